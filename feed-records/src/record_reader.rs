use log::{error, warn};

use crate::{Error, FeedRecord};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::marker::PhantomData;
use std::path::Path;

const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

type BomStripped<R> = std::io::Chain<Cursor<Vec<u8>>, R>;

/// Allows to parameterize how the feed files are read
///
/// ```no_run
/// use feed_records::{RecordReader, StopRecord};
///
/// let mut stops = RecordReader::default()
///     .trim_fields(false)
///     .read_path::<StopRecord, _>("data/stops.txt")?;
/// for stop in &mut stops {
///     println!("{}", stop);
/// }
/// println!("{} rows skipped", stops.stats().skipped);
/// # Ok::<(), feed_records::Error>(())
/// ```
#[derive(Derivative, Debug, Clone)]
#[derivative(Default)]
pub struct RecordReader {
    /// Should the headers and fields be trimmed (default: true)
    #[derivative(Default(value = "true"))]
    pub trim_fields: bool,
    /// Field delimiter (default: `,`)
    #[derivative(Default(value = "b','"))]
    pub delimiter: u8,
}

impl RecordReader {
    /// Should the headers and fields be trimmed (default: true)
    ///
    /// Returns Self and can be chained
    pub fn trim_fields(mut self, trim_fields: bool) -> Self {
        self.trim_fields = trim_fields;
        self
    }

    /// Field delimiter (default: `,`)
    ///
    /// Returns Self and can be chained
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Opens a feed file and returns a lazy iterator over its valid rows
    ///
    /// Fails with [Error::MissingFile] if the file does not exist, so that callers
    /// can tell an absent source apart from an unreadable one.
    pub fn read_path<O, P>(&self, path: P) -> Result<Records<O, File>, Error>
    where
        O: FeedRecord,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("invalid_file_name")
            .to_string();
        if !path.exists() {
            return Err(Error::MissingFile(format!("{}", path.display())));
        }
        let file = File::open(path).map_err(|e| Error::NamedFileIO {
            file_name: file_name.clone(),
            source: Box::new(e),
        })?;
        self.read_from_reader(file, &file_name)
    }

    /// Reads rows from any [std::io::Read]
    ///
    /// `file_name` is only used to report problems
    pub fn read_from_reader<O, R>(&self, mut reader: R, file_name: &str) -> Result<Records<O, R>, Error>
    where
        O: FeedRecord,
        R: Read,
    {
        let prefix = strip_bom(&mut reader).map_err(|e| Error::NamedFileIO {
            file_name: file_name.to_owned(),
            source: Box::new(e),
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .delimiter(self.delimiter)
            .trim(if self.trim_fields {
                csv::Trim::All
            } else {
                csv::Trim::None
            })
            .from_reader(Cursor::new(prefix).chain(reader));

        let headers = reader
            .headers()
            .map_err(|e| Error::CSVError {
                file_name: file_name.to_owned(),
                source: e,
            })?
            .clone();

        let required: Vec<(&'static str, Option<usize>)> = O::REQUIRED_COLUMNS
            .iter()
            .map(|column| (*column, headers.iter().position(|h| h == *column)))
            .collect();
        let absent: Vec<&str> = required
            .iter()
            .filter(|(_, index)| index.is_none())
            .map(|(column, _)| *column)
            .collect();
        if !absent.is_empty() {
            warn!(
                "{file_name}: missing column(s) {}, every row will be skipped",
                absent.join(", ")
            );
        }

        Ok(Records {
            reader,
            file_name: file_name.to_owned(),
            headers,
            required,
            record: csv::StringRecord::new(),
            stats: ReadStats::default(),
            exhausted: false,
            failure: None,
            _row: PhantomData,
        })
    }
}

/// Reads up to the first three bytes, and gives them back unless they are a UTF-8 BOM
fn strip_bom<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(UTF8_BOM.len());
    reader
        .by_ref()
        .take(UTF8_BOM.len() as u64)
        .read_to_end(&mut head)?;
    if head == UTF8_BOM {
        head.clear();
    }
    Ok(head)
}

/// Counters of a [Records] iteration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    /// Data rows read from the file, valid or not
    pub read: usize,
    /// Rows handed out
    pub accepted: usize,
    /// Rows skipped because of a [RecordIssue]
    pub skipped: usize,
}

/// Why a row was skipped
#[derive(Debug)]
pub enum RecordIssue {
    /// A required column is not in the header or not in the row
    MissingColumn(&'static str),
    /// The csv library could not read the row
    Malformed(csv::Error),
    /// A value could not be converted, or did not pass validation
    Invalid(String),
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordIssue::MissingColumn(column) => write!(f, "missing column {column}"),
            RecordIssue::Malformed(e) => write!(f, "malformed row: {e}"),
            RecordIssue::Invalid(reason) => write!(f, "invalid value: {reason}"),
        }
    }
}

/// Lazy iterator over the valid rows of a feed file
///
/// Invalid rows are logged and skipped; the iteration ends with the input,
/// or early on an I/O failure. Call [Records::finish] once done to know which.
pub struct Records<O, R: Read> {
    reader: csv::Reader<BomStripped<R>>,
    file_name: String,
    headers: csv::StringRecord,
    required: Vec<(&'static str, Option<usize>)>,
    record: csv::StringRecord,
    stats: ReadStats,
    exhausted: bool,
    /// I/O failure that ended the iteration early
    failure: Option<csv::Error>,
    _row: PhantomData<O>,
}

impl<O: FeedRecord, R: Read> Records<O, R> {
    /// Counters so far
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Final counters, or the I/O error that cut the file short
    ///
    /// Rows handed out before the failure are still valid, but the file was not
    /// read to its end.
    pub fn finish(self) -> Result<ReadStats, Error> {
        match self.failure {
            Some(source) => Err(Error::CSVError {
                file_name: self.file_name,
                source,
            }),
            None => Ok(self.stats),
        }
    }

    /// Name of the file being read
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Headers of the file, as read
    pub fn headers(&self) -> &csv::StringRecord {
        &self.headers
    }

    fn parse_current(&self) -> Result<O, RecordIssue> {
        for (column, index) in &self.required {
            match index {
                Some(i) if self.record.get(*i).is_some() => {}
                _ => return Err(RecordIssue::MissingColumn(*column)),
            }
        }
        let obj: O = self
            .record
            .deserialize(Some(&self.headers))
            .map_err(|e| RecordIssue::Invalid(csv_reason(&e)))?;
        obj.validate().map_err(RecordIssue::Invalid)?;
        Ok(obj)
    }

    fn skip(&mut self, issue: RecordIssue) {
        self.stats.skipped += 1;
        let line = self.record.position().map(|p| p.line()).unwrap_or_default();
        let values: Vec<&str> = self.record.iter().collect();
        warn!("{}:{line}: {issue}, row skipped: {values:?}", self.file_name);
    }
}

fn csv_reason(e: &csv::Error) -> String {
    match e.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => e.to_string(),
    }
}

impl<O: FeedRecord, R: Read> Iterator for Records<O, R> {
    type Item = O;

    fn next(&mut self) -> Option<O> {
        while !self.exhausted {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => self.exhausted = true,
                Ok(true) => {
                    self.stats.read += 1;
                    match self.parse_current() {
                        Ok(obj) => {
                            self.stats.accepted += 1;
                            return Some(obj);
                        }
                        Err(issue) => self.skip(issue),
                    }
                }
                Err(e) if e.is_io_error() => {
                    error!("{}: read aborted: {e}", self.file_name);
                    self.exhausted = true;
                    self.failure = Some(e);
                }
                Err(e) => {
                    self.stats.read += 1;
                    self.skip(RecordIssue::Malformed(e));
                }
            }
        }
        None
    }
}
