//! The `zipfile` virtual table: one row per central directory entry.
//!
//! ```text
//! CREATE VIRTUAL TABLE t USING zipfile('archive.zip');
//! SELECT path, length FROM t WHERE path MATCH 'docs/*';
//! ```
//!
//! Columns are decoded straight from the archive when asked for,
//! so a query that never touches `data` never inflates anything.
//!
//! The table can't sort by path on its own. Instead, the first time the
//! host plans a query against it, it asks the host to run
//! `SELECT rowid FROM <table> ORDER BY path` and keeps the resulting order.
//! From then on, equality and prefix lookups on `path` and
//! `ORDER BY path` are answered from that order.
//! If the host can't run the query, the table keeps working unsorted.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::*;

use crate::host::Host;
use crate::read::{DirectoryEntry, ZipArchive};
use crate::result::*;
use crate::value::Value;

/// The table declaration handed to the host
pub const SCHEMA: &str =
    "CREATE TABLE x(path, comp, mtime, crc32, length, data, clength, cdata)";

/// Marks the end of a prefix pattern: `docs/*`
pub const WILDCARD: u8 = b'*';

/// Columns of the virtual table, in declaration order
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Column {
    /// Path of the entry, as text
    Path,
    /// Compression method code (0 = stored, 8 = deflated)
    Comp,
    /// Modification time, `YYYY-MM-DD HH:MM:SS`
    Mtime,
    /// CRC-32 of the uncompressed data
    Crc32,
    /// Uncompressed length
    Length,
    /// Uncompressed data, or NULL if it can't be decoded
    Data,
    /// Compressed length
    CompressedLength,
    /// Compressed data, exactly as stored
    CompressedData,
}

impl Column {
    pub const COUNT: usize = 8;

    const ALL: [Column; Column::COUNT] = [
        Column::Path,
        Column::Comp,
        Column::Mtime,
        Column::Crc32,
        Column::Length,
        Column::Data,
        Column::CompressedLength,
        Column::CompressedData,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Column::Path => "path",
            Column::Comp => "comp",
            Column::Mtime => "mtime",
            Column::Crc32 => "crc32",
            Column::Length => "length",
            Column::Data => "data",
            Column::CompressedLength => "clength",
            Column::CompressedData => "cdata",
        }
    }
}

/// Operators the host may offer in a constraint
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    /// `column MATCH 'prefix*'`
    Match,
    Like,
    Glob,
}

/// A `WHERE` term the host proposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConstraint {
    pub column: usize,
    pub op: ConstraintOp,
    /// False if the host can't supply the right-hand side for this plan
    pub usable: bool,
}

/// How we'd like a constraint's value passed to [`ZipCursor::filter`]
///
/// [`ZipCursor::filter`]: struct.ZipCursor.html#method.filter
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConstraintUsage {
    /// 1-based position in the filter arguments, if we want the value
    pub argv_index: Option<usize>,
    /// True if the host needn't double-check the constraint
    pub omit: bool,
}

/// An `ORDER BY` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: usize,
    pub desc: bool,
}

/// The scan strategy chosen by [`ZipTable::best_index`]
///
/// [`ZipTable::best_index`]: struct.ZipTable.html#method.best_index
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexPlan {
    /// Every entry
    FullScan,
    /// Entries whose path equals the argument
    PathEquals,
    /// Entries whose path starts with the argument's prefix
    PathPrefix,
}

impl IndexPlan {
    /// The plan as the integer hosts pass around
    pub fn idx_num(self) -> i32 {
        match self {
            IndexPlan::FullScan => 0,
            IndexPlan::PathEquals => 1,
            IndexPlan::PathPrefix => 2,
        }
    }

    pub fn from_idx_num(idx_num: i32) -> Option<Self> {
        match idx_num {
            0 => Some(IndexPlan::FullScan),
            1 => Some(IndexPlan::PathEquals),
            2 => Some(IndexPlan::PathPrefix),
            _ => None,
        }
    }
}

/// Query-plan negotiation between the host and [`ZipTable::best_index`]
///
/// The host fills in `constraints` and `order_by`;
/// the table fills in the rest.
///
/// [`ZipTable::best_index`]: struct.ZipTable.html#method.best_index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<OrderBy>,
    /// One per constraint
    pub usage: Vec<ConstraintUsage>,
    pub plan: IndexPlan,
    pub estimated_cost: f64,
    pub order_by_consumed: bool,
}

impl IndexInfo {
    /// What the host assumes a plan costs unless told otherwise
    pub const DEFAULT_COST: f64 = 1e6;

    pub fn new(constraints: Vec<IndexConstraint>, order_by: Vec<OrderBy>) -> Self {
        let usage = vec![ConstraintUsage::default(); constraints.len()];
        Self {
            constraints,
            order_by,
            usage,
            plan: IndexPlan::FullScan,
            estimated_cost: Self::DEFAULT_COST,
            order_by_consumed: false,
        }
    }
}

/// Where a table stands on sorting itself by path
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortStatus {
    Unsorted,
    /// The host is running the sort query right now.
    Sorting,
    Sorted,
}

#[derive(Debug)]
enum SortState {
    Unsorted,
    Sorting,
    /// Entry indexes in path order.
    /// Published whole and never modified, so cursors can hold on to it.
    Sorted(Arc<[u32]>),
}

/// The `zipfile` module: makes tables out of `CREATE VIRTUAL TABLE` arguments.
#[derive(Debug, Default, Copy, Clone)]
pub struct ZipModule;

impl ZipModule {
    /// The name the module is registered under
    pub const NAME: &'static str = "zipfile";

    /// Same as [`connect`](#method.connect); the archive is all the state there is.
    pub fn create(&self, args: &[&str]) -> ZipResult<ZipTable> {
        self.connect(args)
    }

    /// Opens a table given `[module, database, table, archive path]`.
    ///
    /// The archive path may be wrapped in single or double quotes.
    pub fn connect(&self, args: &[&str]) -> ZipResult<ZipTable> {
        let [_module, database, table, path, ..] = args else {
            return Err(ZipError::MissingFileName);
        };
        let archive = ZipArchive::open(unquote(path))?;
        Ok(ZipTable::new(archive, database, table))
    }

    /// Drops the table, unmapping its archive.
    pub fn disconnect(&self, table: ZipTable) {
        debug!("Disconnecting {}", table.name);
    }

    /// Same as [`disconnect`](#method.disconnect); there's nothing on disk to remove.
    pub fn destroy(&self, table: ZipTable) {
        self.disconnect(table)
    }
}

/// Strips one pair of matching quotes, if present.
fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(&q @ (b'"' | b'\'')) if bytes.len() > 1 && bytes[bytes.len() - 1] == q => {
            &s[1..s.len() - 1]
        }
        _ => s,
    }
}

/// Quotes an SQL identifier.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One `zipfile` table over one archive
///
/// Any number of [`ZipCursor`]s may read the table at once.
///
/// [`ZipCursor`]: struct.ZipCursor.html
#[derive(Debug)]
pub struct ZipTable {
    archive: ZipArchive,
    /// `"database"."table"`
    name: String,
    sort: Mutex<SortState>,
}

impl ZipTable {
    pub fn new(archive: ZipArchive, database: &str, table: &str) -> Self {
        Self {
            archive,
            name: format!("{}.{}", quote_identifier(database), quote_identifier(table)),
            sort: Mutex::new(SortState::Unsorted),
        }
    }

    /// The table's qualified, quoted name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn archive(&self) -> &ZipArchive {
        &self.archive
    }

    pub fn schema(&self) -> &'static str {
        SCHEMA
    }

    /// The query the table asks its host to run to learn its path order
    pub fn sort_query(&self) -> String {
        format!("SELECT rowid FROM {} ORDER BY path", self.name)
    }

    /// Follows the table to its new name.
    pub fn rename(&mut self, database: &str, table: &str) -> ZipResult<()> {
        self.name = format!("{}.{}", quote_identifier(database), quote_identifier(table));
        Ok(())
    }

    pub fn sort_status(&self) -> SortStatus {
        match *self.lock_sort() {
            SortState::Unsorted => SortStatus::Unsorted,
            SortState::Sorting => SortStatus::Sorting,
            SortState::Sorted(_) => SortStatus::Sorted,
        }
    }

    fn lock_sort(&self) -> MutexGuard<'_, SortState> {
        // The state is only ever swapped whole; a panic can't leave it torn.
        self.sort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The path order, if we have one yet
    fn sorted_order(&self) -> Option<Arc<[u32]>> {
        match &*self.lock_sort() {
            SortState::Sorted(order) => Some(order.clone()),
            _ => None,
        }
    }

    /// Tells the host which constraints and orderings we can handle ourselves.
    ///
    /// Sorts the table first if it hasn't been yet.
    /// Until it's sorted, every query is a full, unordered scan.
    pub fn best_index(&self, host: &dyn Host, info: &mut IndexInfo) -> ZipResult<()> {
        info.plan = IndexPlan::FullScan;
        self.sort_once(host);

        if self.sorted_order().is_none() {
            return Ok(());
        }

        for (constraint, usage) in info.constraints.iter().zip(info.usage.iter_mut()) {
            if !constraint.usable || constraint.column != Column::Path.index() {
                continue;
            }
            let (plan, cost) = match constraint.op {
                ConstraintOp::Eq => (IndexPlan::PathEquals, 1.0),
                ConstraintOp::Match => (IndexPlan::PathPrefix, 2.0),
                _ => continue,
            };
            info.plan = plan;
            info.estimated_cost = cost;
            *usage = ConstraintUsage {
                argv_index: Some(1),
                omit: true,
            };
            break;
        }

        // Paths can repeat, so only a lone `ORDER BY path` is fully satisfied.
        if let [OrderBy { column, desc: false }] = info.order_by.as_slice() {
            if *column == Column::Path.index() {
                info.order_by_consumed = true;
            }
        }
        trace!("{}: planned {:?}", self.name, info);
        Ok(())
    }

    /// Unsorted -> Sorting -> Sorted, or back to Unsorted if anything goes
    /// wrong so that a later plan can try again.
    fn sort_once(&self, host: &dyn Host) {
        {
            let mut state = self.lock_sort();
            match *state {
                SortState::Unsorted => *state = SortState::Sorting,
                SortState::Sorting | SortState::Sorted(_) => return,
            }
        }

        let query = self.sort_query();
        debug!("Sorting {}: {}", self.name, query);
        // The host plans and scans this table while we wait;
        // it sees the Sorting state and gets a plain scan.
        let order = match host.query_rowids(self, &query) {
            Ok(rowids) => self.order_from_rowids(&rowids),
            Err(e) => {
                warn!("Couldn't sort {}: {}", self.name, e);
                None
            }
        };

        let mut state = self.lock_sort();
        *state = match order {
            Some(order) => {
                info!("Sorted {} ({} entries)", self.name, order.len());
                SortState::Sorted(order)
            }
            None => SortState::Unsorted,
        };
    }

    /// Checks the host's answer before we trust it:
    /// it must be a permutation of every entry, and it must put paths in
    /// byte order, since that's what lookups assume.
    fn order_from_rowids(&self, rowids: &[i64]) -> Option<Arc<[u32]>> {
        let entries = self.archive.entries();
        if rowids.len() != entries.len() {
            warn!(
                "Not sorting {}: got {} rows for {} entries",
                self.name,
                rowids.len(),
                entries.len()
            );
            return None;
        }

        let mut seen = vec![false; entries.len()];
        let mut order = Vec::with_capacity(entries.len());
        for &rowid in rowids {
            let index = match usize::try_from(rowid) {
                Ok(i) if i < entries.len() && !seen[i] => i,
                _ => {
                    warn!("Not sorting {}: bad or repeated rowid {}", self.name, rowid);
                    return None;
                }
            };
            seen[index] = true;
            order.push(index as u32);
        }

        let in_byte_order = order.windows(2).all(|pair| {
            self.path_key(pair[0]).as_bytes() <= self.path_key(pair[1]).as_bytes()
        });
        if !in_byte_order {
            warn!(
                "Not sorting {}: host's path collation isn't byte order",
                self.name
            );
            return None;
        }
        Some(order.into())
    }

    /// The path as the `path` column reports it, which is what we sort and match on.
    fn path_key(&self, index: u32) -> Cow<'_, str> {
        self.archive
            .path_text(&self.archive.entries()[index as usize])
    }

    /// Opens a cursor, positioned before the first row.
    pub fn open(&self) -> ZipCursor<'_> {
        ZipCursor {
            table: self,
            order: None,
            scan: Scan::Full,
            pos: None,
        }
    }
}

/// Which rows a cursor walks
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scan {
    /// Every entry, in path order if the table is sorted
    Full,
    /// Nothing at all
    Empty,
    /// Just these entries, in this order
    Filtered(Vec<u32>),
}

/// A parsed prefix pattern
fn prefix_of(pattern: &[u8]) -> ZipResult<&[u8]> {
    match pattern.split_last() {
        Some((&WILDCARD, prefix)) if !prefix.contains(&WILDCARD) => Ok(prefix),
        _ => Err(ZipError::InvalidPattern(
            String::from_utf8_lossy(pattern).into_owned(),
        )),
    }
}

/// An in-flight scan over a [`ZipTable`]
///
/// Call [`filter`](#method.filter) to start the scan,
/// then alternate [`eof`](#method.eof), [`column`](#method.column) /
/// [`rowid`](#method.rowid), and [`next`](#method.next).
/// Dropping the cursor (or [`close`](#method.close)) ends it at any point.
///
/// [`ZipTable`]: struct.ZipTable.html
#[derive(Debug)]
pub struct ZipCursor<'t> {
    table: &'t ZipTable,
    /// The table's path order as of the last filter
    order: Option<Arc<[u32]>>,
    scan: Scan,
    /// None before the first row
    pos: Option<usize>,
}

impl<'t> ZipCursor<'t> {
    /// Starts a scan using the plan [`ZipTable::best_index`] chose,
    /// and moves to the first row.
    ///
    /// `args` holds the constraint values requested by the plan.
    /// A NULL or empty lookup value matches nothing.
    ///
    /// [`ZipTable::best_index`]: struct.ZipTable.html#method.best_index
    pub fn filter(&mut self, plan: IndexPlan, args: &[Value<'_>]) -> ZipResult<()> {
        self.order = self.table.sorted_order();
        self.scan = match (plan, args.first()) {
            (IndexPlan::FullScan, _) | (_, None) => Scan::Full,
            (_, Some(arg)) => match arg.as_text_bytes() {
                None => Scan::Empty,
                Some(key) => match plan {
                    IndexPlan::PathEquals if key.is_empty() => Scan::Empty,
                    IndexPlan::PathEquals => Scan::Filtered(self.lookup(&key, false)),
                    _ => Scan::Filtered(self.lookup(prefix_of(&key)?, true)),
                },
            },
        };
        if let Scan::Filtered(matches) = &self.scan {
            debug!("{}: {} matches", self.table.name, matches.len());
        }

        self.pos = None;
        self.next();
        Ok(())
    }

    /// Finds entries whose path equals `key`, or starts with it if `prefix`.
    fn lookup(&self, key: &[u8], prefix: bool) -> Vec<u32> {
        let table = self.table;
        let matches = |path: &[u8]| {
            if prefix {
                path.starts_with(key)
            } else {
                path == key
            }
        };

        match &self.order {
            // Matches are one contiguous run of the sorted order.
            Some(order) => {
                let start =
                    order.partition_point(|&i| table.path_key(i).as_bytes() < key);
                let run = order[start..]
                    .partition_point(|&i| matches(table.path_key(i).as_bytes()));
                order[start..start + run].to_vec()
            }
            None => (0..table.archive.entries().len() as u32)
                .filter(|&i| matches(table.path_key(i).as_bytes()))
                .collect(),
        }
    }

    /// Moves to the next row.
    pub fn next(&mut self) {
        if self.scan != Scan::Empty {
            self.pos = Some(self.pos.map_or(0, |p| p + 1));
        }
    }

    /// True once there are no more rows (or the cursor was never filtered).
    pub fn eof(&self) -> bool {
        self.current().is_none()
    }

    fn scan_len(&self) -> usize {
        match &self.scan {
            Scan::Full => self.table.archive.entries().len(),
            Scan::Empty => 0,
            Scan::Filtered(matches) => matches.len(),
        }
    }

    /// Index (in directory order) of the entry we're on
    fn current(&self) -> Option<usize> {
        let pos = self.pos.filter(|&p| p < self.scan_len())?;
        Some(match &self.scan {
            Scan::Full => self.order.as_ref().map_or(pos, |o| o[pos] as usize),
            Scan::Filtered(matches) => matches[pos] as usize,
            Scan::Empty => return None,
        })
    }

    fn current_entry(&self) -> ZipResult<&'t DirectoryEntry> {
        let index = self.current().ok_or(ZipError::NoCurrentRow)?;
        let table: &'t ZipTable = self.table;
        Ok(&table.archive.entries()[index])
    }

    /// The current row's position in the central directory.
    ///
    /// Stable no matter how the table is sorted or filtered.
    /// None if the cursor isn't on a row.
    pub fn rowid(&self) -> Option<i64> {
        self.current().map(|i| i as i64)
    }

    /// Decodes column `index` of the current row.
    ///
    /// `data` and `cdata` are NULL if the entry's payload can't be found or
    /// decoded; a broken entry doesn't stop the rest of the scan.
    pub fn column(&self, index: usize) -> ZipResult<Value<'t>> {
        let entry = self.current_entry()?;
        let column = Column::from_index(index).ok_or(ZipError::InvalidColumn(index))?;
        let table: &'t ZipTable = self.table;
        let archive = &table.archive;

        Ok(match column {
            Column::Path => Value::Text(archive.path_text(entry)),
            Column::Comp => Value::Integer(entry.compression_method.code().into()),
            Column::Mtime => Value::Text(Cow::Owned(entry.modified.to_string())),
            Column::Crc32 => Value::Integer(entry.crc32.into()),
            Column::Length => Value::Integer(entry.size.into()),
            Column::Data => match archive.read(entry) {
                Ok(data) => Value::Blob(data),
                Err(e) => {
                    debug!("No data for {}: {}", archive.path_text(entry), e);
                    Value::Null
                }
            },
            Column::CompressedLength => Value::Integer(entry.compressed_size.into()),
            Column::CompressedData => match archive.compressed_data(entry) {
                Ok(data) => Value::Blob(Cow::Borrowed(data)),
                Err(e) => {
                    debug!("No compressed data for {}: {}", archive.path_text(entry), e);
                    Value::Null
                }
            },
        })
    }

    /// Ends the scan. Same as dropping the cursor.
    pub fn close(self) {
        trace!("Closing cursor on {}", self.table.name);
    }
}
