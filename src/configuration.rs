use feed_records::{
    FeedRecord, RecordReader, RouteRecord, ScheduleRecord, ShapePointRecord, StopRecord,
};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Where the graph is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Petgraph graph held by the process, dropped at exit
    Memory,
    Sqlite(PathBuf),
}

impl StoreLocation {
    /// `:memory:` selects [StoreLocation::Memory], anything else is a SQLite file
    pub fn from_arg(arg: &str) -> Self {
        if arg == ":memory:" {
            StoreLocation::Memory
        } else {
            StoreLocation::Sqlite(PathBuf::from(arg))
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Memory => f.write_str("in-memory graph"),
            StoreLocation::Sqlite(path) => write!(f, "sqlite database {}", path.display()),
        }
    }
}

pub struct ImportConfiguration {
    pub data_dir: PathBuf,
    pub stops_file: String,
    pub shapes_file: String,
    pub routes_file: String,
    pub schedules_file: String,
    pub store: StoreLocation,
    /// Rows buffered before a flush to the store
    pub batch_size: usize,
    pub reader: RecordReader,
}

impl Default for ImportConfiguration {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            stops_file: StopRecord::FILE_NAME.into(),
            shapes_file: ShapePointRecord::FILE_NAME.into(),
            routes_file: RouteRecord::FILE_NAME.into(),
            schedules_file: ScheduleRecord::FILE_NAME.into(),
            store: StoreLocation::Sqlite(PathBuf::from("transit-graph.db")),
            batch_size: DEFAULT_BATCH_SIZE,
            reader: RecordReader::default(),
        }
    }
}

impl ImportConfiguration {
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn stops_path(&self) -> PathBuf {
        self.data_dir.join(&self.stops_file)
    }

    pub fn shapes_path(&self) -> PathBuf {
        self.data_dir.join(&self.shapes_file)
    }

    pub fn routes_path(&self) -> PathBuf {
        self.data_dir.join(&self.routes_file)
    }

    pub fn schedules_path(&self) -> PathBuf {
        self.data_dir.join(&self.schedules_file)
    }
}
