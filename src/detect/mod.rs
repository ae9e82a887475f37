pub mod backend;
pub mod backends;
pub mod contract;
pub mod decode;
pub mod loader;
pub mod nms;

pub use backend::{InferenceBackend, NamedTensor, RawOutput};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use contract::{Anchor, ModelContract, ModelFamily};
pub use decode::CandidateDetection;
pub use loader::LoadedModel;
