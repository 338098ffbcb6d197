use candle::Shape;

/// Main library error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown symmetry group {0:?}, expected one of Z2, C4, D4")]
    UnknownGroup(String),

    #[error("normalization axis must be the last dimension (-1), got {axis}")]
    UnsupportedAxis { axis: isize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("the channel axis of the input should have a defined dimension, got {shape:?}")]
    UndefinedChannelDim { shape: Vec<Option<usize>> },

    #[error("{op}: {num_channels} channels cannot be split into orbits of size {order}")]
    ChannelMismatch {
        num_channels: usize,
        order: usize,
        op: &'static str,
    },

    #[error("input {shape:?} is incompatible with the layer, expected rank {rank:?} and {num_channels} channels")]
    InputSpec {
        shape: Shape,
        rank: Option<usize>,
        num_channels: usize,
    },

    #[error("{statistic:?} update has shape {got:?}, expected ({expected},) for the orbits of this layer")]
    UpdateShape {
        statistic: crate::RunningStatistic,
        expected: usize,
        got: Shape,
    },

    #[error("{statistic:?} update was produced by another layer")]
    ForeignUpdate { statistic: crate::RunningStatistic },

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for candle::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Candle(err) => err,
            err => candle::Error::wrap(err),
        }
    }
}
