//! Module for the error management
use thiserror::Error;

/// An error that prevents a feed file from being read at all.
///
/// Problems limited to one row are not errors, see [crate::RecordIssue].
#[derive(Error, Debug)]
pub enum Error {
    /// The file does not exist
    #[error("Could not find file {0}")]
    MissingFile(String),
    /// Impossible to read a file
    #[error("impossible to read '{file_name}'")]
    NamedFileIO {
        /// The file name that could not be read
        file_name: String,
        /// The inital error that caused the unability to read the file
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Impossible to read a CSV file
    #[error("impossible to read csv file '{file_name}'")]
    CSVError {
        /// File name that could not be parsed as CSV
        file_name: String,
        /// The initial error by the csv library
        #[source]
        source: csv::Error,
    },
}
