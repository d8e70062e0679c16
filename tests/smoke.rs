mod common;

use anyhow::{Context, Result};
use log::*;
use rayon::prelude::*;

use ziptab::host::Constraint;
use ziptab::vtab::{Column, SortStatus};
use ziptab::*;

use common::*;

fn hello() -> ZipBuilder {
    ZipBuilder::new()
        .stored("hello/hi.txt", b"Hello, world!\n")
        .deflated("hello/rip.txt", &b"Rest in peace. ".repeat(64))
        .deflated("hello/sr71.txt", &b"Mach 3.3 ".repeat(256))
        .stored("top-level.txt", b"up here")
}

#[test]
fn smoke() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let inputs = [
        hello().write(&dir, "hello.zip")?,
        hello()
            .comment(b"a comment at the end")
            .write(&dir, "hello-commented.zip")?,
    ];

    let mut registry = Registry::new();
    register(&mut registry)?;

    for input in &inputs {
        info!("Querying {}", input);
        let table = registry
            .create_table(ZipModule::NAME, "main", "hello", &[input.as_str()])
            .context("Couldn't create table")?;

        let everything = ScanHost.select(&table, &[Column::Path, Column::Data], &[], true)?;
        assert_eq!(table.sort_status(), SortStatus::Sorted);
        let listed: Vec<String> = everything.iter().map(|r| r.values[0].to_string()).collect();
        assert_eq!(
            listed,
            ["hello/hi.txt", "hello/rip.txt", "hello/sr71.txt", "top-level.txt"]
        );

        let under_hello = ScanHost.select(
            &table,
            &[Column::Path],
            &[Constraint::matches(Column::Path, "hello/*")],
            true,
        )?;
        assert_eq!(under_hello.len(), 3);

        let no_such_file = ScanHost.select(
            &table,
            &[Column::Path],
            &[Constraint::eq(Column::Path, "no/such/file")],
            false,
        )?;
        assert!(no_such_file.is_empty());

        // Check every entry's data against its checksum, in parallel,
        // using the registered crc32 function.
        everything.par_iter().try_for_each(|row| -> Result<()> {
            let crc = registry.call("crc32", &row.values[1..2])?;
            let recorded = ScanHost.select(
                &table,
                &[Column::Crc32],
                &[Constraint::eq(Column::Path, row.values[0].clone())],
                false,
            )?;
            assert_eq!(recorded[0].values[0], crc, "{}", row.values[0]);
            Ok(())
        })?;

        registry
            .module(ZipModule::NAME)
            .context("Module wasn't registered")?
            .disconnect(table);
    }
    Ok(())
}

#[test]
fn registration() -> Result<()> {
    init_logging();
    let mut registry = Registry::new();
    register(&mut registry)?;

    for name in ["crc32", "inflate", "deflate", "compress", "uncompress"] {
        assert!(registry.has_function(name), "{} is missing", name);
    }
    assert!(registry.module(ZipModule::NAME).is_some());
    assert!(!registry.has_function("zipfile"));
    Ok(())
}

#[test]
fn scalar_functions() -> Result<()> {
    init_logging();
    let mut registry = Registry::new();
    register(&mut registry)?;

    let text = Value::from("It was a bright cold day in April, and the clocks were striking thirteen.");

    let deflated = registry.call("deflate", &[text.clone()])?;
    let inflated = registry.call("inflate", &[deflated.clone()])?;
    assert_eq!(inflated.as_bytes(), Some(&text.as_blob()[..]));

    let fast = registry.call("deflate", &[text.clone(), Value::from(1)])?;
    assert_eq!(
        registry.call("inflate", &[fast])?.as_bytes(),
        Some(&text.as_blob()[..])
    );

    let compressed = registry.call("compress", &[text.clone()])?;
    assert_ne!(compressed, deflated);
    let uncompressed = registry.call("uncompress", &[compressed])?;
    assert_eq!(uncompressed.as_bytes(), Some(&text.as_blob()[..]));

    assert_eq!(registry.call("crc32", &[Value::Null])?, Value::Integer(0));
    assert_eq!(registry.call("inflate", &[Value::Null])?, Value::Null);

    // Arity is checked before the function runs.
    assert!(matches!(
        registry.call("crc32", &[]),
        Err(ZipError::Arguments(_))
    ));
    assert!(matches!(
        registry.call("deflate", &[text.clone(), Value::from(9), Value::from(9)]),
        Err(ZipError::Arguments(_))
    ));
    assert!(matches!(
        registry.call("compress", &[text, Value::from(11)]),
        Err(ZipError::InvalidLevel(11))
    ));
    assert!(matches!(
        registry.call("inflate", &[Value::from(&b"\xff\xff\xff\xff"[..])]),
        Err(ZipError::Inflate)
    ));
    assert!(matches!(
        registry.call("unzip", &[Value::Null]),
        Err(ZipError::Host(_))
    ));
    Ok(())
}

#[test]
fn missing_module_or_file() -> Result<()> {
    init_logging();
    let mut registry = Registry::new();
    register(&mut registry)?;

    assert!(matches!(
        registry.create_table("tarfile", "main", "t", &["foo.tar"]),
        Err(ZipError::Host(_))
    ));
    assert!(matches!(
        registry.create_table(ZipModule::NAME, "main", "t", &[]),
        Err(ZipError::MissingFileName)
    ));
    Ok(())
}
