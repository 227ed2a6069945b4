pub type PromapResult<T> = Result<T, PromapError>;

#[derive(thiserror::Error, Debug)]
pub enum PromapError {
    #[error("media open error: {0}")]
    MediaOpen(String),

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("frame read error: {0}")]
    FrameRead(String),

    #[error("project load error: {0}")]
    ProjectLoad(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PromapError {
    pub fn media_open(msg: impl Into<String>) -> Self {
        Self::MediaOpen(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateGeometry(msg.into())
    }

    pub fn frame_read(msg: impl Into<String>) -> Self {
        Self::FrameRead(msg.into())
    }

    pub fn project_load(msg: impl Into<String>) -> Self {
        Self::ProjectLoad(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
