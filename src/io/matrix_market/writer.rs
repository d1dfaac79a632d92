use std::borrow::Borrow;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::io::{SparseMatrixReader, SparseMatrixWriter};
use crate::sparse::SparseVector;
use crate::utils::Element;

use super::MATRIX_MARKET_HEADER;

/// Width of the blank statistics line reserved before the data and patched
/// once all rows are written. Wide enough for three 64-bit counts.
const STATISTICS_PLACEHOLDER_WIDTH: usize = 60;

/// Streams sparse rows to a MatrixMarket coordinate file.
///
/// Rows are consumed lazily, so the counts are only known at the end; the
/// statistics line is written as a placeholder and back-patched.
pub struct MatrixMarketWriter<W: Write + Seek> {
    stream: Option<W>,
    rows_count: usize,
    columns_count: usize,
    elements_count: u64,
}

impl MatrixMarketWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Creating MatrixMarket file {}", path.display());
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Seek> MatrixMarketWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: Some(stream),
            rows_count: 0,
            columns_count: 0,
            elements_count: 0,
        }
    }

    /// Copies every row of `reader`, propagating the first scan error.
    pub fn write_reader<T, R>(&mut self, reader: &R) -> Result<()>
    where
        T: Element,
        R: SparseMatrixReader<T> + ?Sized,
    {
        self.write_rows(reader.read_rows()?)
    }

    /// Flushes and releases the stream. Later writes fail with
    /// [`Error::Disposed`].
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }
        Ok(())
    }

    /// Returns the underlying stream, or `None` if the writer was closed.
    pub fn into_inner(self) -> Option<W> {
        self.stream
    }

    fn write_rows<T, I, V>(&mut self, rows: I) -> Result<()>
    where
        T: Element,
        I: Iterator<Item = Result<V>>,
        V: Borrow<SparseVector<T>>,
    {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Disposed("MatrixMarket writer"))?;
        let mut out = BufWriter::new(stream);

        writeln!(out, "{}", MATRIX_MARKET_HEADER)?;
        let statistics_position = out.stream_position()?;
        writeln!(out, "{:width$}", "", width = STATISTICS_PLACEHOLDER_WIDTH)?;

        let mut rows_count = 0usize;
        let mut columns_count = 0usize;
        let mut elements_count = 0u64;
        for row in rows {
            let row = row?;
            let row: &SparseVector<T> = row.borrow();
            rows_count += 1;
            for (column, value) in row {
                if value.is_zero() {
                    continue;
                }
                columns_count = columns_count.max(column + 1);
                elements_count += 1;
                writeln!(out, "{} {} {}", rows_count, column + 1, value)?;
            }
        }

        let end = out.stream_position()?;
        out.seek(SeekFrom::Start(statistics_position))?;
        write!(out, "{} {} {}", rows_count, columns_count, elements_count)?;
        out.seek(SeekFrom::Start(end))?;
        out.flush()?;

        log::debug!(
            "Wrote MatrixMarket matrix with {} rows, {} columns, {} elements",
            rows_count,
            columns_count,
            elements_count
        );
        self.rows_count = rows_count;
        self.columns_count = columns_count;
        self.elements_count = elements_count;
        Ok(())
    }
}

impl<W: Write + Seek> SparseMatrixWriter for MatrixMarketWriter<W> {
    fn rows_count(&self) -> usize {
        self.rows_count
    }

    fn columns_count(&self) -> usize {
        self.columns_count
    }

    fn elements_count(&self) -> u64 {
        self.elements_count
    }

    fn write<T, I, V>(&mut self, rows: I) -> Result<()>
    where
        T: Element,
        I: IntoIterator<Item = V>,
        V: Borrow<SparseVector<T>>,
    {
        self.write_rows(rows.into_iter().map(Ok))
    }
}
