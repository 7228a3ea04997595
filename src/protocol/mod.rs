pub mod pktline;
mod git_protocol;
mod receive_pack;
mod upload_pack;

pub use git_protocol::{GitBackend, GitService, ServiceInput};
pub use receive_pack::{authorize_push, parse_ref_updates, PreReceiveValidator, ProtectedRefs, RefUpdate};
pub use upload_pack::authorize_fetch;
