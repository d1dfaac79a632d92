use std::marker::PhantomData;
use std::sync::OnceLock;

use memmap2::{Mmap, MmapMut};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::io::{RowIter, SparseMatrixReader};
use crate::sparse::{MatrixElement, OrderedRows, SparseVector};
use crate::utils::{to_i32, Element};

const INDEX_SIZE: usize = 4;

/// Decorator that records the rows of its inner reader into an anonymous
/// mapping during the first complete scan and serves every later scan from
/// that mapping.
///
/// The counts of the inner reader are read once at construction. Records are
/// `{row: i32, column: i32, value: T}` in little-endian, written in the order
/// the inner reader produces them.
///
/// A scan that is dropped early leaves the cache incomplete, so the next scan
/// goes back to the inner reader. While one scan is populating the cache, any
/// other scan is served directly by the inner reader.
pub struct CachingSparseMatrixReader<T: Element, R> {
    inner: R,
    rows_count: usize,
    columns_count: usize,
    elements_count: u64,
    /// Writable cache used by the populating scan. Emptied once complete.
    populate: Mutex<Option<MmapMut>>,
    /// Read-only cache, set by the first scan that reaches the end.
    complete: OnceLock<CompleteCache>,
    closed: bool,
    _marker: PhantomData<fn() -> T>,
}

struct CompleteCache {
    records: Mmap,
    len: usize,
}

impl<T: Element, R: SparseMatrixReader<T>> CachingSparseMatrixReader<T, R> {
    pub fn new(inner: R) -> Result<Self> {
        let rows_count = inner.rows_count();
        let columns_count = inner.columns_count();
        let elements_count = inner.elements_count();
        to_i32(rows_count, "rows count")?;
        to_i32(columns_count, "columns count")?;

        let capacity = usize::try_from(elements_count)
            .ok()
            .and_then(|count| count.checked_mul(record_size::<T>()))
            .ok_or_else(|| {
                Error::argument(format!("{} elements do not fit into a cache", elements_count))
            })?;
        let records = MmapMut::map_anon(capacity)?;
        log::debug!(
            "Reserved a {} byte cache for {}x{} matrix with {} elements",
            capacity,
            rows_count,
            columns_count,
            elements_count
        );

        Ok(Self {
            inner,
            rows_count,
            columns_count,
            elements_count,
            populate: Mutex::new(Some(records)),
            complete: OnceLock::new(),
            closed: false,
            _marker: PhantomData,
        })
    }

    pub fn is_fully_cached(&self) -> bool {
        self.complete.get().is_some()
    }

    /// Releases the cache mapping. Later scans fail with
    /// [`Error::Disposed`].
    pub fn close(&mut self) {
        self.closed = true;
        self.populate.get_mut().take();
        self.complete.take();
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_cached<'a>(&'a self, cache: &'a CompleteCache) -> RowIter<'a, T> {
        let size = record_size::<T>();
        let elements = cache.records[..cache.len * size]
            .chunks_exact(size)
            .map(|record| Ok(decode_record::<T>(record)));
        Box::new(OrderedRows::new(
            elements,
            self.rows_count,
            self.columns_count,
            self.elements_count,
        ))
    }
}

impl<T, R> SparseMatrixReader<T> for CachingSparseMatrixReader<T, R>
where
    T: Element,
    R: SparseMatrixReader<T>,
{
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
        if self.closed {
            return Err(Error::Disposed("caching sparse matrix reader"));
        }
        if let Some(cache) = self.complete.get() {
            return Ok(self.read_cached(cache));
        }

        match self.populate.try_lock() {
            Some(guard) if guard.is_some() => Ok(Box::new(PopulatingRows {
                rows: self.inner.read_rows()?,
                records: guard,
                complete: &self.complete,
                rows_count: self.rows_count,
                columns_count: self.columns_count,
                capacity: self.elements_count,
                written: 0,
                row: 0,
                done: false,
            })),
            _ => {
                // The cache may have been completed since the first check.
                if let Some(cache) = self.complete.get() {
                    return Ok(self.read_cached(cache));
                }
                log::debug!("Cache is being populated by another scan, reading the inner rows");
                self.inner.read_rows()
            }
        }
    }
}

/// Scan over the inner reader that appends every non-zero element to the
/// cache, holding the populate lock until dropped.
struct PopulatingRows<'a, T: Element> {
    rows: RowIter<'a, T>,
    records: MutexGuard<'a, Option<MmapMut>>,
    complete: &'a OnceLock<CompleteCache>,
    rows_count: usize,
    columns_count: usize,
    capacity: u64,
    written: u64,
    row: usize,
    done: bool,
}

impl<T: Element> PopulatingRows<'_, T> {
    fn record(&mut self, vector: &SparseVector<T>) -> Result<()> {
        if self.row >= self.rows_count {
            return Err(Error::format(format!(
                "inner reader yielded more than the declared {} rows",
                self.rows_count
            )));
        }
        let records = self
            .records
            .as_mut()
            .ok_or(Error::Disposed("caching sparse matrix reader"))?;
        let size = record_size::<T>();
        for (column, value) in vector {
            if column >= self.columns_count {
                return Err(Error::format(format!(
                    "inner reader yielded column {} beyond the declared {} columns",
                    column, self.columns_count
                )));
            }
            if self.written >= self.capacity {
                return Err(Error::format(format!(
                    "inner reader yielded more than the declared {} elements",
                    self.capacity
                )));
            }
            let start = self.written as usize * size;
            encode_record(
                &mut records[start..start + size],
                self.row as i32,
                column as i32,
                value,
            );
            self.written += 1;
        }
        self.row += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(records) = self.records.take() {
            let records = records.make_read_only()?;
            let len = self.written as usize;
            if self.complete.set(CompleteCache { records, len }).is_ok() {
                log::debug!("Cache is complete with {} elements", len);
            }
        }
        Ok(())
    }
}

impl<T: Element> Iterator for PopulatingRows<'_, T> {
    type Item = Result<SparseVector<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Some(Ok(vector)) => match self.record(&vector) {
                Ok(()) => Some(Ok(vector)),
                Err(error) => {
                    self.done = true;
                    Some(Err(error))
                }
            },
            Some(Err(error)) => {
                self.done = true;
                Some(Err(error))
            }
            None => {
                self.done = true;
                self.finish().err().map(Err)
            }
        }
    }
}

fn record_size<T: Element>() -> usize {
    2 * INDEX_SIZE + T::SIZE
}

fn encode_record<T: Element>(record: &mut [u8], row: i32, column: i32, value: T) {
    row.write_le(&mut record[..INDEX_SIZE]);
    column.write_le(&mut record[INDEX_SIZE..2 * INDEX_SIZE]);
    value.write_le(&mut record[2 * INDEX_SIZE..]);
}

fn decode_record<T: Element>(record: &[u8]) -> MatrixElement<T> {
    let row = i32::read_le(&record[..INDEX_SIZE]);
    let column = i32::read_le(&record[INDEX_SIZE..2 * INDEX_SIZE]);
    let value = T::read_le(&record[2 * INDEX_SIZE..]);
    MatrixElement::new(row as usize, column as usize, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemorySparseMatrixReader;
    use crate::testing::{random_reader, CountingReader};

    fn collect<T: Element>(reader: &impl SparseMatrixReader<T>) -> Vec<SparseVector<T>> {
        reader.read_rows().unwrap().map(|row| row.unwrap()).collect()
    }

    #[test]
    fn test_properties_match_inner_reader() {
        let inner = random_reader(100, 100, 0.01, 7);
        let cached = CachingSparseMatrixReader::new(inner.clone()).unwrap();
        assert_eq!(cached.rows_count(), inner.rows_count());
        assert_eq!(cached.columns_count(), inner.columns_count());
        assert_eq!(cached.elements_count(), inner.elements_count());
    }

    #[test]
    fn test_full_scan_caches_and_is_idempotent() {
        let inner = random_reader(100, 100, 0.01, 42);
        let expected = inner.rows().to_vec();
        let cached = CachingSparseMatrixReader::<f64, _>::new(CountingReader::new(inner)).unwrap();
        assert!(!cached.is_fully_cached());

        let first = collect(&cached);
        assert!(cached.is_fully_cached());
        let second = collect(&cached);
        let third = collect(&cached);

        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(third, expected);
        assert_eq!(cached.into_inner().scans(), 1);
    }

    #[test]
    fn test_partial_scan_does_not_complete_cache() {
        let inner = random_reader(100, 100, 0.01, 3);
        let expected = inner.rows().to_vec();
        let cached = CachingSparseMatrixReader::<f64, _>::new(CountingReader::new(inner)).unwrap();

        let first_row = cached.read_rows().unwrap().next().unwrap().unwrap();
        assert_eq!(first_row, expected[0]);
        assert!(!cached.is_fully_cached());

        assert_eq!(collect(&cached), expected);
        assert!(cached.is_fully_cached());
        assert_eq!(collect(&cached), expected);
        assert_eq!(cached.into_inner().scans(), 2);
    }

    #[test]
    fn test_overlapping_scan_passes_through() {
        let inner = random_reader(20, 10, 0.2, 11);
        let expected = inner.rows().to_vec();
        let cached = CachingSparseMatrixReader::<f64, _>::new(CountingReader::new(inner)).unwrap();

        let mut populating = cached.read_rows().unwrap();
        populating.next().unwrap().unwrap();
        assert_eq!(collect(&cached), expected);
        assert!(!cached.is_fully_cached());

        let rest: Vec<_> = populating.map(|row| row.unwrap()).collect();
        assert_eq!(rest, expected[1..]);
        assert!(cached.is_fully_cached());
        assert_eq!(cached.into_inner().scans(), 2);
    }

    #[test]
    fn test_empty_rows_survive_cache() {
        let inner = InMemorySparseMatrixReader::with_columns_count(
            vec![
                SparseVector::new(),
                SparseVector::from([(1, 3i64)]),
                SparseVector::new(),
                SparseVector::new(),
            ],
            2,
        )
        .unwrap();
        let cached = CachingSparseMatrixReader::new(inner.clone()).unwrap();
        collect(&cached);
        assert_eq!(collect(&cached), inner.rows());
    }

    #[test]
    fn test_inner_reader_exceeding_elements_count_fails() {
        struct Undercounting(InMemorySparseMatrixReader<i32>);

        impl SparseMatrixReader<i32> for Undercounting {
            fn rows_count(&self) -> usize {
                self.0.rows_count()
            }

            fn columns_count(&self) -> usize {
                self.0.columns_count()
            }

            fn elements_count(&self) -> u64 {
                1
            }

            fn read_rows(&self) -> Result<RowIter<'_, i32>> {
                self.0.read_rows()
            }
        }

        let inner = InMemorySparseMatrixReader::new(vec![SparseVector::from([(0, 1), (1, 2)])]);
        let cached = CachingSparseMatrixReader::new(Undercounting(inner)).unwrap();
        let rows: Vec<_> = cached.read_rows().unwrap().collect();
        assert!(rows[0].as_ref().unwrap_err().is_format());
        assert!(!cached.is_fully_cached());
    }

    #[test]
    fn test_matrix_without_elements_is_cached() {
        let inner = InMemorySparseMatrixReader::<f64>::with_columns_count(
            vec![SparseVector::new(), SparseVector::new()],
            3,
        )
        .unwrap();
        let cached = CachingSparseMatrixReader::<f64, _>::new(CountingReader::new(inner)).unwrap();
        assert_eq!(cached.elements_count(), 0);

        assert_eq!(collect(&cached).len(), 2);
        assert!(cached.is_fully_cached());
        let rows = collect(&cached);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(SparseVector::is_empty));
        assert_eq!(cached.into_inner().scans(), 1);
    }

    #[test]
    fn test_closed_reader_rejects_scans() {
        let mut cached = CachingSparseMatrixReader::new(random_reader(5, 5, 0.5, 1)).unwrap();
        collect(&cached);
        cached.close();
        assert!(!cached.is_fully_cached());
        assert!(cached.read_rows().err().unwrap().is_disposed());
    }
}
