use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use anyhow::{bail, Context, Result};
use clap::Parser;

use adelie_core::{compile_file, CompileOptions};

/// Compiler for the Adelie language. Translates a source file into a
/// self-contained C program, and can optionally hand that off to a C
/// compiler and run the result.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source file to compile.
    input: PathBuf,

    /// Where to write the generated C (defaults to the input path with a
    /// `.c` extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compile the generated C into an executable.
    #[arg(long)]
    build: bool,

    /// C compiler to use with --build.
    #[arg(long, value_name = "COMPILER", default_value = "cc")]
    cc: String,

    /// Build and immediately run the executable (implies --build).
    #[arg(long)]
    run: bool,

    /// Interleave explanatory comments with the generated code.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            process::exit(1);
        }
    }
}

fn execute(cli: Cli) -> Result<i32> {
    let options = CompileOptions { annotate: cli.debug };
    let result = compile_file(&cli.input, options)?;

    for message in &result.messages {
        eprintln!("{message}");
    }
    let Some(artifact) = result.artifact else {
        let n = result.error_count;
        let plural = if n == 1 { "" } else { "s" };
        eprintln!("{n} error{plural}; no output written");
        return Ok(1);
    };

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("c"));
    write_output(&out_path, artifact.as_bytes())?;

    if cli.build || cli.run {
        let exe_path = out_path.with_extension("");
        build_artifact(&cli.cc, &out_path, &exe_path)?;
        if cli.run {
            return run_executable(&exe_path);
        }
    }
    Ok(0)
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output file {path:?}"))?;
    Ok(())
}

fn build_artifact(cc: &str, c_path: &Path, exe_path: &Path) -> Result<()> {
    let status = Command::new(cc)
        .arg(c_path)
        .arg("-o")
        .arg(exe_path)
        .status()
        .with_context(|| format!("failed to invoke C compiler '{cc}'"))?;
    if !status.success() {
        bail!("'{cc}' exited with {status}");
    }
    Ok(())
}

/// Run the built executable and propagate its exit status.
fn run_executable(exe_path: &Path) -> Result<i32> {
    let status = Command::new(exe_path)
        .status()
        .with_context(|| format!("failed to run {exe_path:?}"))?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    const VALID: &str = "\
program sum is
integer a;
integer b;
begin
getInteger(a);
getInteger(b);
putInteger(a + b);
end program
";

    const BROKEN: &str = "\
program sum is
integer a;
begin
a := \"not an integer\";
end program
";

    fn adelie() -> Command {
        Command::cargo_bin("adelie").expect("binary builds")
    }

    #[test]
    fn compiles_a_valid_program_to_the_default_path() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sum.adl");
        fs::write(&input, VALID).expect("write source");

        adelie().arg(&input).assert().success();

        let generated = fs::read_to_string(dir.path().join("sum.c")).expect("artifact exists");
        assert!(generated.contains("int main(void)"));
    }

    #[test]
    fn respects_an_explicit_output_path() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sum.adl");
        let output = dir.path().join("nested").join("out.c");
        fs::write(&input, VALID).expect("write source");

        adelie()
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .assert()
            .success();

        assert!(output.is_file());
    }

    #[test]
    fn reports_diagnostics_and_withholds_output_on_errors() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sum.adl");
        fs::write(&input, BROKEN).expect("write source");

        adelie()
            .arg(&input)
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("sum.adl:4:"))
            .stderr(predicate::str::contains("no output written"));

        assert!(!dir.path().join("sum.c").exists());
    }

    #[test]
    fn missing_input_is_reported_as_a_host_error() {
        adelie()
            .arg("does/not/exist.adl")
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read source"));
    }

    #[test]
    fn debug_flag_annotates_the_artifact() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sum.adl");
        fs::write(&input, VALID).expect("write source");

        adelie().arg(&input).arg("--debug").assert().success();
        let annotated = fs::read_to_string(dir.path().join("sum.c")).expect("artifact");
        assert!(annotated.contains("/* entry of 'sum' */"));

        adelie().arg(&input).assert().success();
        let plain = fs::read_to_string(dir.path().join("sum.c")).expect("artifact");
        assert!(!plain.contains("/* entry of"));
    }
}
