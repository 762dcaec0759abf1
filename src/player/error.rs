use thiserror::Error;

/// Shader stage a compile failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
            ShaderStage::Link => write!(f, "link"),
        }
    }
}

/// Typed error enum for the playback core
///
/// Engine and shader failures are hard stops that the caller must recover from
/// (usually by switching to the alternate playback path). Subtitle failures are
/// logged and degrade to "no subtitle selected"; playback continues.
#[derive(Error, Debug, Clone)]
pub enum PlayerError {
    /// Native engine missing, failed to initialize, or already destroyed
    #[error("Native engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Shader compile or link failure during compositor setup
    #[error("Shader {stage} failure: {log}")]
    ShaderCompileFailure { stage: ShaderStage, log: String },

    /// A single subtitle endpoint (or the whole endpoint list) failed
    #[error("Subtitle fetch failed for {url}: {reason}")]
    SubtitleFetchFailure { url: String, reason: String },

    /// Bounded track discovery finished without a usable track
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// An engine command or property call was rejected
    #[error("Engine error: {0}")]
    Engine(String),

    /// GPU object creation failed outside shader compilation
    #[error("GPU error: {0}")]
    Gpu(String),

    /// The compositor's render thread has exited
    #[error("Render thread disconnected")]
    RenderThreadGone,

    /// A newer video swap replaced the one being waited on
    #[error("Superseded by a newer video load")]
    Superseded,

    /// Waiting for the engine exceeded its deadline
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PlayerError {
    /// Whether the error must abort the playback attempt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::EngineUnavailable(_)
                | PlayerError::ShaderCompileFailure { .. }
                | PlayerError::Gpu(_)
                | PlayerError::RenderThreadGone
        )
    }

    /// Whether the error only affects subtitle selection
    pub fn is_subtitle_degradation(&self) -> bool {
        matches!(
            self,
            PlayerError::SubtitleFetchFailure { .. } | PlayerError::TrackNotFound(_)
        )
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(error: std::io::Error) -> Self {
        PlayerError::Io(error.to_string())
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
