use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file} CSV error: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },

    #[error("{file} did not contain a header row")]
    MissingHeader { file: String },

    #[error("{file} is missing required column '{column}'")]
    MissingColumn { file: String, column: String },
}

impl ParserError {
    pub(crate) fn from_csv(file: &str, source: csv::Error) -> Self {
        ParserError::Csv {
            file: file.to_string(),
            source,
        }
    }
}
