use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("price {price} KRW outside tradable band ({min}..={max})")]
    InvalidPriceBand { price: f64, min: f64, max: f64 },

    #[error("symbol {0} is on the exchange caution list")]
    RestrictedSymbol(String),

    #[error("indicator {0} is not available yet")]
    StaleIndicator(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("messenger error: {0}")]
    Messenger(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
