use std::{
    env,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// Shared libraries built for the module loading tests: output stem and source
const MODULES: &[(&str, &str)] = &[
    ("BANDS", "bands.rs"),
    ("EMPTY", "empty.rs"),
    // exports BANDS_init, so the WRONG_init lookup fails
    ("WRONG", "bands.rs"),
];

fn main() {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    println!("cargo:rerun-if-changed={}", fixtures.display());

    // fixtures are not packaged, and a module built for another target cannot be
    // opened by the test process
    let host = env::var("HOST").unwrap_or_default();
    let target = env::var("TARGET").unwrap_or_default();
    if !fixtures.is_dir() || host != target {
        return;
    }

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let modules = out_dir.join("modules");
    fs::create_dir_all(&modules).expect("Failed to create the module directory");

    for (stem, source) in MODULES {
        let output = modules.join(format!(
            "{}{stem}.{}",
            env::consts::DLL_PREFIX,
            env::consts::DLL_EXTENSION
        ));
        let status = Command::new(&rustc)
            .args(["--edition", "2021", "--crate-type", "cdylib", "--crate-name"])
            .arg(stem.to_lowercase())
            .arg("-o")
            .arg(&output)
            .arg(fixtures.join(source))
            .status()
            .expect("Failed to execute rustc");

        if !status.success() {
            panic!("building the {stem} test module failed with exit code: {:?}", status.code());
        }
    }

    println!("cargo:rustc-env=NITF_TRE_TEST_MODULES={}", modules.display());
}
