//! # Switchyard Campaigns
//!
//! Computes when a campaign event fires for a contact and manages the
//! resulting fire records:
//! - `schedule`: pure fire-time math
//! - `lifecycle`: recompute, create and cancel fires inside a transaction
//! - `poller`: tick loop that queues due fires
//! - `worker`: task handler that hands due fires to the flow starter
//! - `starter`: flow-start boundary

pub mod lifecycle;
pub mod poller;
pub mod schedule;
pub mod starter;
pub mod worker;

pub use lifecycle::{deactivate_event, remove_contact, reschedule_contact_fires, schedule_event};
pub use poller::{FireMarker, FirePoller, spawn_fire_poller};
pub use schedule::{schedule_for_contact, schedule_for_time};
pub use starter::{FlowStarter, QueuedFlowStarter, StartFlowTask};
pub use worker::{FireCampaignEventHandler, FireCampaignEventTask};
