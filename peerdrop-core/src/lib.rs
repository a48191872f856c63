//! PeerDrop core: link state machine, transfer framing and progress reporting.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod device;
pub mod error;
pub mod events;
pub mod ffi;
pub mod link;
pub mod progress;
pub mod transfer;
pub mod wire;

pub use device::{ConnectionInfo, GroupInfo, PeerDevice, PeerStatus, Role};
pub use error::{DropError, ErrorKind, ErrorReply, FailureReason};
pub use events::{Notification, RadioEvent};
pub use link::{LinkAction, LinkMachine, LinkState, OWNER_INTENT};
pub use progress::{ProgressReporter, ProgressSink};
pub use transfer::{TransferDescriptor, TransferId, TransferProgress, TransferResult};
pub use wire::{decode_header, encode_header, FileHeader, FrameDecodeError, FrameEncodeError};
