//! Announcement events: relay subscription, replaceable-event
//! reconciliation, and the reconciled repository metadata view.

mod announcement;
mod event;
mod relay;
mod resolver;

pub use announcement::{Contributor, ContributorRole, RepoAnnouncement};
pub use event::{AnnouncementEvent, REPO_ANNOUNCEMENT_KIND};
pub use relay::{Filter, RelayClient, RelayError, RelayMessage, Subscription};
pub use resolver::{EventError, EventResolver, Result};
