use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonetaryError {
    #[error("Amount is empty")]
    Empty,
    #[error("Amount [{0}] is not a valid decimal value")]
    InvalidFormat(String),
    #[error("Amount [{value}] has more than {places} decimal places")]
    TooPrecise {
        value: String,
        places: usize
    },
    #[error("Amount [{0}] overflows the fixed-point range")]
    Overflow(String)
}
