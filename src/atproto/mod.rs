// SPDX-License-Identifier: MPL-2.0

mod firehose;
mod frame;
mod records;
mod types;

#[cfg(test)]
pub mod testing;

pub use firehose::{Connector, FirehoseClient, FirehoseError, MessageStream};
pub use frame::FrameError;
pub use records::decode_commit;
pub use types::{Collection, DecodedOp, OpAction, Record, StreamMessage};
