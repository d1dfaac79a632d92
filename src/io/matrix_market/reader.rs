use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::io::{RowIter, SparseMatrixReader};
use crate::sparse::{MatrixElement, OrderedRows};
use crate::utils::Element;

use super::{is_skippable, MATRIX_MARKET_HEADER};

/// Row-by-row reader over a MatrixMarket coordinate stream.
///
/// The header and statistics line are validated once at construction; each
/// [`read_rows`](SparseMatrixReader::read_rows) call seeks back to the first
/// data line and scans the stream lazily. Only one scan may be alive at a time
/// since all scans share the underlying stream position.
pub struct MatrixMarketReader<T: Element, S> {
    stream: Mutex<Option<BufReader<S>>>,
    data_start: u64,
    rows_count: usize,
    columns_count: usize,
    elements_count: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> MatrixMarketReader<T, File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Opening MatrixMarket file {}", path.display());
        Self::new(File::open(path)?)
    }
}

impl<T: Element, S: Read + Seek> MatrixMarketReader<T, S> {
    pub fn new(stream: S) -> Result<Self> {
        let mut stream = BufReader::new(stream);
        stream.seek(SeekFrom::Start(0))?;

        let mut line = String::new();
        let mut position = read_line(&mut stream, &mut line)? as u64;
        if line.trim() != MATRIX_MARKET_HEADER {
            return Err(Error::format(format!(
                "expected header '{}', found '{}'",
                MATRIX_MARKET_HEADER,
                line.trim()
            )));
        }

        loop {
            line.clear();
            let read = read_line(&mut stream, &mut line)?;
            if read == 0 {
                return Err(Error::format("statistics line is missing"));
            }
            position += read as u64;
            if !is_skippable(&line) {
                break;
            }
        }
        let (rows_count, columns_count, elements_count) = parse_statistics(&line)?;

        log::debug!(
            "MatrixMarket stream declares {} rows, {} columns, {} elements",
            rows_count,
            columns_count,
            elements_count
        );

        Ok(Self {
            stream: Mutex::new(Some(stream)),
            data_start: position,
            rows_count,
            columns_count,
            elements_count,
            _marker: PhantomData,
        })
    }

    /// Releases the stream. Later scans fail with [`Error::Disposed`].
    pub fn close(&mut self) {
        self.stream.get_mut().take();
    }

    /// Returns the underlying stream, or `None` if the reader was closed.
    pub fn into_inner(self) -> Option<S> {
        self.stream.into_inner().map(BufReader::into_inner)
    }
}

impl<T: Element, S: Read + Seek> SparseMatrixReader<T> for MatrixMarketReader<T, S> {
    fn rows_count(&self) -> usize {
        self.rows_count
    }

    fn columns_count(&self) -> usize {
        self.columns_count
    }

    fn elements_count(&self) -> u64 {
        self.elements_count
    }

    fn read_rows(&self) -> Result<RowIter<'_, T>> {
        let mut guard = self.stream.try_lock().ok_or_else(|| {
            Error::InvalidOperation(
                "another scan of this MatrixMarket stream is in progress".to_string(),
            )
        })?;
        guard
            .as_mut()
            .ok_or(Error::Disposed("MatrixMarket reader"))?
            .seek(SeekFrom::Start(self.data_start))?;

        let elements = DataLines {
            stream: guard,
            line: String::new(),
            line_number: 0,
            done: false,
            _marker: PhantomData,
        };
        Ok(Box::new(OrderedRows::new(
            elements,
            self.rows_count,
            self.columns_count,
            self.elements_count,
        )))
    }
}

/// Parses the data lines of one scan. Holds the stream lock until dropped.
struct DataLines<'a, T, S> {
    stream: MutexGuard<'a, Option<BufReader<S>>>,
    line: String,
    line_number: usize,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element, S: Read + Seek> DataLines<'_, T, S> {
    fn next_element(&mut self) -> Result<Option<MatrixElement<T>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Disposed("MatrixMarket reader"))?;
        loop {
            self.line.clear();
            if read_line(stream, &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if !is_skippable(&self.line) {
                return parse_element(&self.line, self.line_number).map(Some);
            }
        }
    }
}

impl<T: Element, S: Read + Seek> Iterator for DataLines<'_, T, S> {
    type Item = Result<MatrixElement<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_element().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

/// Reads one line; bytes that are not UTF-8 make the stream malformed rather
/// than unreadable.
fn read_line<B: BufRead>(stream: &mut B, line: &mut String) -> Result<usize> {
    stream.read_line(line).map_err(|error| match error.kind() {
        ErrorKind::InvalidData => Error::format(format!("line is not valid UTF-8: {}", error)),
        _ => Error::Io(error),
    })
}

fn parse_statistics(line: &str) -> Result<(usize, usize, u64)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(Error::format(format!(
            "statistics line must hold rows, columns and elements: '{}'",
            line.trim()
        )));
    }
    let rows = parse_count::<i32>(tokens[0], "rows count")?;
    let columns = parse_count::<i32>(tokens[1], "columns count")?;
    let elements = parse_count::<i64>(tokens[2], "elements count")?;
    Ok((rows as usize, columns as usize, elements as u64))
}

fn parse_count<N>(token: &str, what: &str) -> Result<N>
where
    N: std::str::FromStr + PartialOrd + Default,
{
    match token.parse::<N>() {
        Ok(value) if value >= N::default() => Ok(value),
        _ => Err(Error::format(format!(
            "{} must be a non-negative integer, found '{}'",
            what, token
        ))),
    }
}

fn parse_element<T: Element>(line: &str, line_number: usize) -> Result<MatrixElement<T>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(Error::format(format!(
            "data line {} must hold row, column and value: '{}'",
            line_number,
            line.trim()
        )));
    }
    let row = parse_index(tokens[0], "row", line_number)?;
    let column = parse_index(tokens[1], "column", line_number)?;
    let value = T::parse_value(tokens[2])?;
    Ok(MatrixElement::new(row, column, value))
}

/// Converts a 1-based index token to a 0-based index.
fn parse_index(token: &str, what: &str, line_number: usize) -> Result<usize> {
    match token.parse::<i64>() {
        Ok(index) if index >= 1 => usize::try_from(index - 1).map_err(|_| {
            Error::format(format!(
                "{} index {} on data line {} is too large",
                what, index, line_number
            ))
        }),
        _ => Err(Error::format(format!(
            "{} index on data line {} must be a positive integer, found '{}'",
            what, line_number, token
        ))),
    }
}
