//! What we need from the query engine hosting us, plus a small
//! in-process host that provides it.
//!
//! A real embedding (an SQL engine's extension API) implements [`Host`]
//! and [`Registrar`] over its own machinery.
//! [`ScanHost`] and [`Registry`] do the same with nothing but this crate:
//! they plan and run single-table queries against a [`ZipTable`],
//! which is plenty for tools and tests.
//!
//! [`Host`]: trait.Host.html
//! [`Registrar`]: ../extension/trait.Registrar.html
//! [`ScanHost`]: struct.ScanHost.html
//! [`Registry`]: struct.Registry.html
//! [`ZipTable`]: ../vtab/struct.ZipTable.html

use std::collections::BTreeMap;
use std::fmt;

use log::*;

use crate::extension::{Arity, Registrar, ScalarFunction};
use crate::result::*;
use crate::value::Value;
use crate::vtab::*;

/// The one thing a table asks of its host
pub trait Host {
    /// Runs `sql` (always `SELECT rowid FROM <table> ORDER BY path`)
    /// and returns the rowids in the order the host produced them.
    ///
    /// The host will plan and scan `table` to answer,
    /// so this is called while the table is in the middle of
    /// [`ZipTable::best_index`].
    ///
    /// [`ZipTable::best_index`]: ../vtab/struct.ZipTable.html#method.best_index
    fn query_rowids(&self, table: &ZipTable, sql: &str) -> ZipResult<Vec<i64>>;
}

/// A `WHERE` term for [`ScanHost::select`]
///
/// [`ScanHost::select`]: struct.ScanHost.html#method.select
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint<'a> {
    pub column: Column,
    pub op: ConstraintOp,
    pub value: Value<'a>,
}

impl<'a> Constraint<'a> {
    /// `column = value`
    pub fn eq<V: Into<Value<'a>>>(column: Column, value: V) -> Self {
        Self {
            column,
            op: ConstraintOp::Eq,
            value: value.into(),
        }
    }

    /// `column MATCH 'prefix*'`
    pub fn matches<V: Into<Value<'a>>>(column: Column, value: V) -> Self {
        Self {
            column,
            op: ConstraintOp::Match,
            value: value.into(),
        }
    }

    /// Checks a row the table didn't filter for us.
    fn accepts(&self, row_value: &Value<'_>) -> ZipResult<bool> {
        let (Some(have), Some(want)) = (row_value.as_text_bytes(), self.value.as_text_bytes())
        else {
            return Ok(false);
        };
        match self.op {
            ConstraintOp::Eq => Ok(have == want),
            ConstraintOp::Match => match want.split_last() {
                Some((&WILDCARD, prefix)) if !prefix.contains(&WILDCARD) => {
                    Ok(have.starts_with(prefix))
                }
                _ => Err(ZipError::InvalidPattern(
                    String::from_utf8_lossy(&want).into_owned(),
                )),
            },
            ConstraintOp::Gt => Ok(have > want),
            ConstraintOp::Ge => Ok(have >= want),
            ConstraintOp::Lt => Ok(have < want),
            ConstraintOp::Le => Ok(have <= want),
            ConstraintOp::Like | ConstraintOp::Glob => Err(ZipError::Host(format!(
                "{:?} isn't supported by the scan host",
                self.op
            ))),
        }
    }
}

/// One result row: its rowid and the selected columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub rowid: i64,
    pub values: Vec<Value<'static>>,
}

/// Plans and runs single-table queries the way an SQL engine would:
/// negotiate a plan with [`ZipTable::best_index`], filter, step the cursor,
/// and then apply whatever constraints and ordering the table didn't.
///
/// [`ZipTable::best_index`]: ../vtab/struct.ZipTable.html#method.best_index
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanHost;

impl ScanHost {
    /// `SELECT <columns> FROM table WHERE <constraints> [ORDER BY path]`
    pub fn select(
        &self,
        table: &ZipTable,
        columns: &[Column],
        constraints: &[Constraint<'_>],
        order_by_path: bool,
    ) -> ZipResult<Vec<Row>> {
        let mut info = IndexInfo::new(
            constraints
                .iter()
                .map(|c| IndexConstraint {
                    column: c.column.index(),
                    op: c.op,
                    usable: true,
                })
                .collect(),
            if order_by_path {
                vec![OrderBy {
                    column: Column::Path.index(),
                    desc: false,
                }]
            } else {
                Vec::new()
            },
        );
        table.best_index(self, &mut info)?;
        trace!("Plan for {}: {:?}", table.name(), info);

        // Hand over the values the table asked for, in the order it asked.
        let mut wanted: Vec<(usize, &Value<'_>)> = info
            .usage
            .iter()
            .zip(constraints)
            .filter_map(|(usage, c)| usage.argv_index.map(|argv| (argv, &c.value)))
            .collect();
        wanted.sort_by_key(|(argv, _)| *argv);
        let args: Vec<Value<'_>> = wanted.into_iter().map(|(_, v)| v.clone()).collect();

        let leftovers: Vec<&Constraint<'_>> = info
            .usage
            .iter()
            .zip(constraints)
            .filter(|(usage, _)| !usage.omit)
            .map(|(_, c)| c)
            .collect();

        let mut cursor = table.open();
        cursor.filter(info.plan, &args)?;

        // (rowid, path for sorting, selected values)
        let mut rows = Vec::new();
        while !cursor.eof() {
            let mut keep = true;
            for constraint in &leftovers {
                let value = cursor.column(constraint.column.index())?;
                if !constraint.accepts(&value)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                let rowid = cursor.rowid().ok_or(ZipError::NoCurrentRow)?;
                let sort_key = if order_by_path && !info.order_by_consumed {
                    cursor.column(Column::Path.index())?.into_owned()
                } else {
                    Value::Null
                };
                let values = columns
                    .iter()
                    .map(|c| cursor.column(c.index()).map(Value::into_owned))
                    .collect::<ZipResult<Vec<_>>>()?;
                rows.push((sort_key, Row { rowid, values }));
            }
            cursor.next();
        }
        cursor.close();

        if order_by_path && !info.order_by_consumed {
            // Binary collation, stable for equal paths
            rows.sort_by(|(a, _), (b, _)| a.as_text_bytes().cmp(&b.as_text_bytes()));
        }
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

impl Host for ScanHost {
    fn query_rowids(&self, table: &ZipTable, sql: &str) -> ZipResult<Vec<i64>> {
        debug!("Running {}", sql);
        Ok(self
            .select(table, &[], &[], true)?
            .into_iter()
            .map(|row| row.rowid)
            .collect())
    }
}

/// Functions and modules registered by [`register`]
///
/// [`register`]: ../extension/fn.register.html
#[derive(Default)]
pub struct Registry {
    functions: BTreeMap<String, (Arity, ScalarFunction)>,
    modules: BTreeMap<String, ZipModule>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls the scalar function `name`.
    pub fn call(&self, name: &str, args: &[Value<'_>]) -> ZipResult<Value<'static>> {
        let (arity, function) = self
            .functions
            .get(name)
            .ok_or_else(|| ZipError::Host(format!("No such function: {}", name)))?;
        if !arity.accepts(args.len()) {
            return Err(ZipError::Arguments("wrong number of arguments"));
        }
        function(args)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn module(&self, name: &str) -> Option<&ZipModule> {
        self.modules.get(name)
    }

    /// `CREATE VIRTUAL TABLE <database>.<table> USING <module>(<args>)`
    pub fn create_table(
        &self,
        module: &str,
        database: &str,
        table: &str,
        args: &[&str],
    ) -> ZipResult<ZipTable> {
        let zip_module = self
            .module(module)
            .ok_or_else(|| ZipError::Host(format!("No such module: {}", module)))?;
        let mut full_args = vec![module, database, table];
        full_args.extend_from_slice(args);
        zip_module.create(&full_args)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("modules", &self.modules)
            .finish()
    }
}

impl Registrar for Registry {
    fn create_function(
        &mut self,
        name: &str,
        arity: Arity,
        function: ScalarFunction,
    ) -> ZipResult<()> {
        trace!("Registering function {}", name);
        self.functions.insert(name.to_owned(), (arity, function));
        Ok(())
    }

    fn create_module(&mut self, name: &str, module: ZipModule) -> ZipResult<()> {
        trace!("Registering module {}", name);
        self.modules.insert(name.to_owned(), module);
        Ok(())
    }
}
