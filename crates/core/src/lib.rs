pub mod control;
pub mod decode;
pub mod error;
pub mod media;
pub mod metrics;
pub mod pinning;
pub mod protocol;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod stream;
pub mod transport;

pub use control::{ControlClient, InterceptorChain};
pub use decode::{DecodePipeline, DecodeWorker, DecodedFrame, PixelFormat, VideoCodec};
pub use error::{ConnectionErrorKind, IngestError, Result};
pub use metrics::MetricsCollector;
pub use pinning::{CertificatePinner, CertificatePinningConfig};
pub use ratelimit::{FixedInterval, RateLimiter, TokenBucket};
pub use registry::{DecoderHandle, SessionHandle, SessionRegistry};
pub use session::{ConnectionStatus, ReconnectPolicy, Session, SessionConfig};
pub use stream::{RawFrame, StreamDescriptor, StreamKind};
