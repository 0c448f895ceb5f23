use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use wasm2qbe::{compile, wat_to_wasm, CompileOptions};
use wasm2qbe_abi::MODULE_INIT;

/// What the pipeline stops at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// QBE intermediate language
    Qbe,
    /// Assembly produced by `qbe`
    Asm,
    /// Object file assembled by `cc`
    Obj,
    /// Executable linked against the runtime
    Exe,
}

impl Emit {
    fn extension(self) -> &'static str {
        match self {
            Emit::Qbe => "ssa",
            Emit::Asm => "s",
            Emit::Obj => "o",
            Emit::Exe => "",
        }
    }
}

/// wasm2qbe: ahead-of-time WebAssembly compiler emitting QBE IL.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly module (.wasm, or .wat text)
    input: PathBuf,

    /// Output file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Output kind
    #[arg(long, value_enum, default_value_t = Emit::Qbe)]
    emit: Emit,

    /// Exported function the executable's `main` calls after initialisation
    #[arg(long, default_value = "wasm_main")]
    entry: String,

    /// Executables return the entry's result as the exit status instead of
    /// printing it
    #[arg(long)]
    no_print: bool,

    /// Target passed to `qbe -t`
    #[arg(long, short)]
    target: Option<String>,

    /// Runtime library linked into executables
    #[arg(long)]
    runtime: Option<PathBuf>,

    /// Omit linear memory bounds checks
    #[arg(long)]
    no_bounds_checks: bool,

    /// Compile self-recursive tail calls as calls instead of loops
    #[arg(long)]
    no_tail_call_loops: bool,

    /// Validate and lower functions in parallel
    #[arg(long, short)]
    jobs: bool,

    /// Log more (repeat for more detail)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> CompileOptions {
        CompileOptions {
            bounds_checks: !self.no_bounds_checks,
            self_tail_call_loops: !self.no_tail_call_loops,
            parallel: self.jobs,
            ..CompileOptions::default()
        }
    }

    /// `-o`, else the input path with the extension of the output kind.
    /// `None` means stdout.
    fn output_path(&self) -> Option<PathBuf> {
        match (&self.output, self.emit) {
            (Some(path), _) => Some(path.clone()),
            (None, Emit::Qbe) => None,
            (None, emit) => Some(self.input.with_extension(emit.extension())),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    log::info!("compiling {}", cli.input.display());

    let input =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;
    let wasm_bytes = if cli.input.extension().is_some_and(|e| e == "wat") {
        let text = String::from_utf8(input).context("WebAssembly text is not UTF-8")?;
        wat_to_wasm(&text)?
    } else {
        input
    };

    let mut qbe = compile(&wasm_bytes, &cli.options())
        .with_context(|| format!("failed to compile {}", cli.input.display()))?;

    let output = cli.output_path();
    match cli.emit {
        Emit::Qbe => match output {
            Some(path) => {
                fs::write(&path, &qbe)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                log::info!("wrote {}", path.display());
            }
            None => print!("{}", qbe),
        },
        emit => {
            let output = output.context("no output path")?;
            if emit == Emit::Exe {
                let entry = wasm2qbe::emit::mangle::mangle_export(&cli.entry);
                qbe.push_str(&entry_shim(&entry, !cli.no_print));
            }
            build(&cli, emit, &qbe, &output)?;
            log::info!("wrote {}", output.display());
        }
    }
    Ok(())
}

/// A C `main` that initialises the module and calls the entry export, which
/// must return an `i32`. The result is printed with `printf`, or returned as
/// the exit status when `print_result` is false.
fn entry_shim(entry: &str, print_result: bool) -> String {
    let mut shim = String::new();
    if print_result {
        shim.push_str("\ndata $__wasm_main_fmt = { b \"%d\\n\", b 0 }\n");
    }
    shim.push_str("\nexport function w $main() {\n@start\n");
    shim.push_str(&format!("\tcall ${}()\n", MODULE_INIT));
    shim.push_str(&format!("\t%result =w call ${}()\n", entry));
    if print_result {
        shim.push_str("\tcall $printf(l $__wasm_main_fmt, ..., w %result)\n");
        shim.push_str("\tret 0\n");
    } else {
        shim.push_str("\tret %result\n");
    }
    shim.push_str("}\n");
    shim
}

/// Run `qbe`, then `cc` for objects and executables.
fn build(cli: &Cli, emit: Emit, qbe: &str, output: &Path) -> Result<()> {
    let mut il = tempfile::Builder::new()
        .suffix(".ssa")
        .tempfile()
        .context("failed to create temporary file")?;
    il.write_all(qbe.as_bytes())
        .context("failed to write temporary file")?;

    let asm = tempfile::Builder::new()
        .suffix(".s")
        .tempfile()
        .context("failed to create temporary file")?;
    let asm_path = if emit == Emit::Asm {
        output.to_path_buf()
    } else {
        asm.path().to_path_buf()
    };

    let mut qbe_cmd = Command::new("qbe");
    if let Some(target) = &cli.target {
        qbe_cmd.arg("-t").arg(target);
    }
    qbe_cmd.arg("-o").arg(&asm_path).arg(il.path());
    run(qbe_cmd)?;

    match emit {
        Emit::Obj => {
            let mut cc = Command::new("cc");
            cc.arg("-c").arg(&asm_path).arg("-o").arg(output);
            run(cc)
        }
        Emit::Exe => {
            let mut cc = Command::new("cc");
            cc.arg(&asm_path);
            if let Some(runtime) = &cli.runtime {
                cc.arg(runtime);
            } else {
                log::warn!("no --runtime given; linking may fail on runtime symbols");
            }
            cc.arg("-o").arg(output);
            run(cc)
        }
        Emit::Qbe | Emit::Asm => Ok(()),
    }
}

fn run(mut cmd: Command) -> Result<()> {
    log::debug!("running {:?}", cmd);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {:?}", cmd.get_program()))?;
    if !status.success() {
        bail!("{:?} exited with {}", cmd.get_program(), status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["wasm2qbe", "input.wasm"]);
        assert_eq!(cli.input, PathBuf::from("input.wasm"));
        assert!(cli.output.is_none());
        assert_eq!(cli.emit, Emit::Qbe);
        assert_eq!(cli.entry, "wasm_main");
        let options = cli.options();
        assert!(options.bounds_checks);
        assert!(options.self_tail_call_loops);
        assert!(!options.parallel);
    }

    #[test]
    fn cli_maps_flags_to_options() {
        let cli = Cli::parse_from([
            "wasm2qbe",
            "a.wasm",
            "--no-bounds-checks",
            "--no-tail-call-loops",
            "-j",
            "-vv",
        ]);
        let options = cli.options();
        assert!(!options.bounds_checks);
        assert!(!options.self_tail_call_loops);
        assert!(options.parallel);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn output_path_follows_emit_kind() {
        let cli = Cli::parse_from(["wasm2qbe", "dir/prog.wasm", "--emit", "obj"]);
        assert_eq!(cli.output_path(), Some(PathBuf::from("dir/prog.o")));
        let cli = Cli::parse_from(["wasm2qbe", "prog.wasm"]);
        assert_eq!(cli.output_path(), None);
        let cli = Cli::parse_from(["wasm2qbe", "prog.wasm", "-o", "x.ssa"]);
        assert_eq!(cli.output_path(), Some(PathBuf::from("x.ssa")));
    }

    #[test]
    fn entry_shim_initialises_first() {
        let shim = entry_shim("wasm_main", true);
        let init = shim.find(MODULE_INIT).unwrap();
        let entry = shim.find("$wasm_main").unwrap();
        assert!(init < entry);
    }

    #[test]
    fn entry_shim_prints_result_by_default() {
        let shim = entry_shim("wasm_collatz", true);
        assert!(shim.contains("data $__wasm_main_fmt = { b \"%d\\n\", b 0 }"));
        assert!(shim.contains("\t%result =w call $wasm_collatz()\n"));
        assert!(shim.contains("\tcall $printf(l $__wasm_main_fmt, ..., w %result)\n\tret 0\n"));
    }

    #[test]
    fn entry_shim_no_print_returns_result() {
        let cli = Cli::parse_from(["wasm2qbe", "prog.wasm", "--emit", "exe", "--no-print"]);
        let shim = entry_shim("wasm_main", !cli.no_print);
        assert!(!shim.contains("printf"));
        assert!(shim.contains("\t%result =w call $wasm_main()\n\tret %result\n"));
    }
}
