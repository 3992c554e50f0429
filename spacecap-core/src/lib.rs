pub mod capture;
pub mod chain;
pub mod config;
pub mod error;
pub mod naming;
pub mod resolver;

pub use capture::{
    CaptureError, CaptureJob, CaptureOrchestrator, CaptureOutcome, CapturePlan, CaptureResult,
    CaptureStage, CommandExecutor, MuxTags, SystemCommandExecutor,
};
pub use chain::{ChainError, ChainResult, StreamEndpoints, UrlChain};
pub use config::{
    load_spacecap_config, CaptureSection, NetworkSection, OutputSection, SpacecapConfig,
};
pub use error::{ConfigError, Result};
pub use naming::{sanitize_filename, NameContext, DEFAULT_NAME_TEMPLATE};
pub use resolver::{
    BroadcastMetadata, LifecycleState, ResolverError, ResolverResult, SpaceResolver,
};
