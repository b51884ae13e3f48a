/*! Readers for the flat files of a transit feed: stops, shape points, routes and schedules.

Each file is a CSV table with a header row. This crate brings [serde](https://serde.rs)
structures for the rows and a lazy reader that yields them one at a time.

To get started, see [RecordReader].

## Design decisions

### Bad rows are not fatal

A feed is usually good enough to be imported even when some of its rows are not.
[Records] never stops on a malformed row: a row with a missing required column,
an unparsable coordinate or a negative sequence number is logged, counted in
[ReadStats] and skipped. Only the failure to open a file, or an I/O failure while
reading it (returned by [Records::finish]), is reported as an [Error].

### Renaming

We strip the object type from the column names (`stop_name` is [StopRecord::name]).
*/
#![warn(missing_docs)]

#[macro_use]
extern crate derivative;

pub mod error;
pub(crate) mod objects;
mod record_reader;
mod serde_helpers;


pub use error::Error;
pub use objects::*;
pub use record_reader::{ReadStats, RecordIssue, RecordReader, Records};
