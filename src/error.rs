use thiserror::Error;

#[derive(Error, Debug)]
pub enum PKError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    #[error("Simulation error: {0}")]
    Simulation(String),
}

pub type PKResult<T> = Result<T, PKError>;
