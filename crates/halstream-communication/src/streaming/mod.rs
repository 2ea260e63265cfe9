//! Outbound pipelines: the interactive Feeder, the program Sender and the
//! Workflow state machine that gates the Sender.

pub mod feeder;
pub mod filter;
pub mod sender;
pub mod workflow;

pub use feeder::{Feeder, FeederItem, FeederStep};
pub use filter::{
    DataFilter, FilterAction, FilterContext, FilterOutcome, FilterTarget, PassThrough,
};
pub use sender::{NextOptions, Sender, SenderEvent, SenderStep, DEFAULT_BUFFER_SIZE};
pub use workflow::Workflow;
