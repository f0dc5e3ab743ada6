//! # Switchyard Broadcasts
//!
//! A broadcast is fanned out into fixed-size batches of contacts. Each batch
//! is a task of its own; the terminal batch also carries every explicitly
//! addressed URN and marks the broadcast sent when it finishes.

pub mod courier;
pub mod fanout;
pub mod send;

pub use courier::{BrokerCourier, Courier, SendMsgsTask};
pub use fanout::{
    BroadcastBatch, FanoutOptions, FanoutPlan, SendBroadcastHandler, SendBroadcastTask, UrnOverride,
    create_broadcast_batches, plan_batches,
};
pub use send::{SendBroadcastBatchHandler, build_messages};
