use std::env;
use std::error::Error;
use std::process::Command;

use simple_error::SimpleError;

fn main() -> Result<(), Box<dyn Error>> {
    vergen::EmitBuilder::builder()
        .all_build()
        .all_rustc()
        .emit()?;

    let version = match git_output(&["describe", "--tags", "--exact-match"])? {
        Some(tag) => tag,
        None => format!("v{}-dev", env::var("CARGO_PKG_VERSION")?),
    };
    let sha = git_output(&["rev-parse", "HEAD"])?.unwrap_or(String::from("unknown"));

    println!("cargo:rustc-env=BUILD_VERSION={version}");
    println!("cargo:rustc-env=BUILD_SHA={sha}");
    println!("cargo:rustc-env=BUILD_TYPE={}", env::var("PROFILE")?);
    println!("cargo:rustc-env=BUILD_TARGET={}", env::var("TARGET")?);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}

/// Run git and return its trimmed stdout, `None` when git is missing or fails
/// (building from a source tarball).
fn git_output(args: &[&str]) -> Result<Option<String>, Box<dyn Error>> {
    let output = match Command::new("git").args(args).output() {
        Ok(output) => output,
        Err(_) => return Ok(None),
    };
    if !output.status.success() {
        return Ok(None);
    }

    let out = String::from_utf8(output.stdout)
        .map_err(|_| SimpleError::new(format!("git {} output is not utf-8", args.join(" "))))?;
    let out = out.trim();
    if out.is_empty() {
        return Ok(None);
    }
    Ok(Some(out.to_string()))
}
