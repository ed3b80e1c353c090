use std::{
    fs,
    io::{Cursor, Seek, SeekFrom},
    path::PathBuf,
    sync::Arc,
    thread,
};

use nitf_tre::{
    error::{Error, Result},
    registry::{ExpectedLength, PLUGIN_PATH_VAR},
    Extensions, HandlerRegistry, ParseOptions,
};
use pretty_assertions::assert_eq;
use tracing::info;
use tracing_test::traced_test;

fn resources() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
}

fn registry(options: ParseOptions) -> Result<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();
    builder
        .options(options)
        .load_directory(resources().join("catalogs"))?;
    Ok(builder.build())
}

const GOOD: &str = r#"
@tre GOOD
{NITF_BCS_A, 4, "Value", "VALUE"},
{NITF_END, 0, NULL, NULL}
"#;

const BAD: &str = r#"
@tre BAD
{NITF_BCS_A, 4, "Value", "VALUE"},
"#;

#[traced_test]
#[test]
fn loads_resource_catalogs() -> Result<()> {
    let mut builder = HandlerRegistry::builder();
    let report = builder.load_directory(resources().join("catalogs"))?;
    assert!(report.failed.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.loaded.len(), 7);

    let registry = builder.build();
    let mut tags = registry.tags().collect::<Vec<_>>();
    tags.sort();
    assert_eq!(
        tags,
        vec!["ACCHZB", "ACFTA", "BANDSB", "BGDIM", "NOTE", "POINTS", "SECURE"]
    );
    Ok(())
}

#[traced_test]
#[test]
fn broken_module_does_not_stop_loading() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("good.catalog"), GOOD)?;
    fs::write(dir.path().join("bad.catalog"), BAD)?;
    fs::write(dir.path().join("notes.txt"), "not a module")?;

    let mut builder = HandlerRegistry::builder();
    let report = builder.load_directory(dir.path())?;

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.loaded[0].1, vec!["GOOD".to_owned()]);
    assert_eq!(report.skipped, vec![dir.path().join("notes.txt")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, dir.path().join("bad.catalog"));
    assert!(logs_contain("skipping module"));

    let registry = builder.build();
    assert!(registry.contains("GOOD"));
    assert!(!registry.contains("BAD"));
    Ok(())
}

#[traced_test]
#[test]
fn missing_directory_is_an_error() {
    let mut builder = HandlerRegistry::builder();
    let result = builder.load_directory("/nonexistent/handlers");
    assert!(matches!(result, Err(Error::ModuleLoad { .. })));
}

#[traced_test]
#[test]
fn loads_plugin_path_from_environment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("good.catalog"), GOOD)?;

    std::env::set_var(PLUGIN_PATH_VAR, dir.path());
    let mut builder = HandlerRegistry::builder();
    let report = builder.load_env_plugin_path();
    std::env::remove_var(PLUGIN_PATH_VAR);

    let report = report?.expect("plugin path is set");
    assert_eq!(report.loaded.len(), 1);
    assert!(builder.build().contains("GOOD"));
    Ok(())
}

#[traced_test]
#[test]
fn overloaded_tag_resolves_by_length() -> Result<()> {
    let registry = registry(ParseOptions::default())?;

    let lengths = registry
        .candidates("ACFTA")
        .unwrap_or_default()
        .iter()
        .map(|c| c.length)
        .collect::<Vec<_>>();
    assert_eq!(
        lengths,
        vec![ExpectedLength::Exact(10), ExpectedLength::Exact(20)]
    );

    assert_eq!(registry.resolve("ACFTA", 10)?.name(), "ACFTA_10");
    assert_eq!(registry.resolve("ACFTA", 20)?.name(), "ACFTA_20");
    assert!(matches!(
        registry.resolve("ACFTA", 15),
        Err(Error::UnknownTre { length: 15, .. })
    ));
    Ok(())
}

#[traced_test]
#[test]
fn reads_extension_section_with_raw_fallback() -> Result<()> {
    let registry = registry(ParseOptions::default())?;
    let data = fs::read(resources().join("sample.ext"))?;

    let mut cursor = Cursor::new(&data);
    let extensions = Extensions::read(&registry, &mut cursor, data.len())?;
    assert_eq!(cursor.position(), data.len() as u64);

    let tags = extensions.iter().map(|t| t.tag()).collect::<Vec<_>>();
    assert_eq!(tags, vec!["BGDIM", "POINTS", "ZZUNKN", "NOTE"]);

    let unknown = extensions.by_tag("ZZUNKN").next().expect("raw TRE kept");
    assert!(unknown.is_raw());
    assert_eq!(unknown.to_bytes()?, b"hello".to_vec());

    let points = extensions.by_tag("POINTS").next().expect("POINTS parsed");
    assert_eq!(points.len(), 5);
    for tre in &extensions {
        info!("{tre}");
    }

    let mut out = Cursor::new(Vec::new());
    let written = extensions.write(&mut out)?;
    assert_eq!(written, data.len());
    assert_eq!(out.into_inner(), data);
    Ok(())
}

#[traced_test]
#[test]
fn unknown_tre_fails_without_raw_fallback() -> Result<()> {
    let registry = registry(ParseOptions::builder().raw_fallback(false).build())?;
    let data = fs::read(resources().join("sample.ext"))?;

    let result = Extensions::read(&registry, &mut Cursor::new(&data), data.len());
    assert!(matches!(result, Err(Error::UnknownTre { .. })));
    Ok(())
}

#[traced_test]
#[test]
fn section_is_read_from_an_offset() -> Result<()> {
    let registry = registry(ParseOptions::default())?;
    let sample = fs::read(resources().join("sample.ext"))?;

    let mut data = b"HEADER".to_vec();
    data.extend_from_slice(&sample);
    data.extend_from_slice(b"TRAILER");

    let mut cursor = Cursor::new(&data);
    cursor.seek(SeekFrom::Start(6))?;
    let extensions = Extensions::read(&registry, &mut cursor, sample.len())?;
    assert_eq!(extensions.len(), 4);
    assert_eq!(cursor.position(), 6 + sample.len() as u64);
    Ok(())
}

#[traced_test]
#[test]
fn truncated_section_is_rejected() -> Result<()> {
    let registry = registry(ParseOptions::default())?;
    let data = b"BGDIM 00016000001000000";
    let result = Extensions::read(&registry, &mut Cursor::new(data), data.len());
    assert!(matches!(result, Err(Error::TruncatedRecord { .. })));
    Ok(())
}

#[traced_test]
#[test]
fn registry_is_shared_between_threads() -> Result<()> {
    let registry = Arc::new(registry(ParseOptions::default())?);

    let handles = (0..4)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                let data = format!("{:08}{:08}", i * 100, i * 200);
                registry
                    .read_tre("BGDIM", data.len(), &mut Cursor::new(data.as_bytes()))
                    .and_then(|tre| tre.to_bytes())
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(|e| e.to_string())
            })
        })
        .collect::<Vec<_>>();

    for (i, handle) in handles.into_iter().enumerate() {
        let written = handle
            .join()
            .expect("reader thread panicked")
            .map_err(Error::CustomError)?;
        assert_eq!(written, format!("{:08}{:08}", i * 100, i * 200));
    }
    Ok(())
}

#[traced_test]
#[test]
fn loads_shared_library_modules() -> Result<()> {
    let Some(modules) = option_env!("NITF_TRE_TEST_MODULES") else {
        info!("test modules were not built for this target");
        return Ok(());
    };
    let module = |stem: &str| {
        PathBuf::from(modules).join(format!(
            "{}{stem}.{}",
            std::env::consts::DLL_PREFIX,
            std::env::consts::DLL_EXTENSION
        ))
    };

    let mut builder = HandlerRegistry::builder();
    let report = builder.load_directory(modules)?;

    assert_eq!(report.loaded, vec![(module("BANDS"), vec!["BANDS".to_owned()])]);
    let failed = report
        .failed
        .iter()
        .map(|(path, e)| (path.clone(), e.to_string()))
        .collect::<Vec<_>>();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].0, module("EMPTY"));
    assert!(failed[0].1.contains("EMPTY_init returned no catalog"));
    assert_eq!(failed[1].0, module("WRONG"));
    assert!(failed[1].1.contains("WRONG_init"));

    let registry = builder.build();
    assert_eq!(registry.modules().collect::<Vec<_>>(), vec![module("BANDS").as_path()]);
    assert!(!registry.contains("EMPTY"));

    // the library stays open for every clone of the registry
    let shared = registry.clone();
    drop(registry);
    assert_eq!(shared.modules().count(), 1);
    let tre = shared.read_tre("BANDS", 8, &mut Cursor::new(b"02REDNIR"))?;
    assert_eq!(tre.get("BAND[1]").and_then(|f| f.as_str()), Some("NIR"));
    assert_eq!(tre.to_bytes()?, b"02REDNIR".to_vec());
    Ok(())
}
