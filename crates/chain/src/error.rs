use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid {method} response: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} returned no result")]
    MissingResult { method: &'static str },
}
