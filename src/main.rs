use kuroko as lib;
use lib::vm::builtins::system;
use lib::{Interpreter, InterpretError, VmConfig, VmFlags};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: kuroko [-g] [-t] [-d] [-M path]... [run] FILE [args...]
       kuroko [flags] -m MODULE [args...]
       kuroko compile FILE [-o OUT]
       kuroko exec OUT [args...]
       kuroko disasm FILE";

#[derive(Debug, Default)]
struct Options {
    subcmd: Option<String>,
    flags: VmFlags,
    module: Option<String>,
    module_paths: Vec<String>,
    out_path: Option<String>,
    path: Option<String>,
    script_args: Vec<String>,
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-g" => opts.flags |= VmFlags::ENABLE_STRESS_GC,
            "-t" => opts.flags |= VmFlags::TRACE_EXECUTION,
            "-d" => opts.flags |= VmFlags::DISASSEMBLE_ON_COMPILE,
            "-m" => {
                let name = args.next().ok_or("-m requires a module name")?;
                opts.module = Some(name);
                // 나머지는 스크립트 인자
                opts.script_args = args.by_ref().collect();
            }
            "-M" => opts.module_paths.push(args.next().ok_or("-M requires a path")?),
            "-o" => opts.out_path = Some(args.next().ok_or("-o requires a path")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            s if opts.subcmd.is_none()
                && opts.path.is_none()
                && ["run", "compile", "exec", "disasm"].contains(&s) =>
            {
                opts.subcmd = Some(s.to_string());
            }
            s if s.starts_with('-') && opts.path.is_none() => return Err(format!("unknown option '{}'\n{}", s, USAGE)),
            _ => {
                opts.path = Some(arg);
                if opts.subcmd.as_deref() != Some("compile") {
                    opts.script_args = args.by_ref().collect();
                }
            }
        }
    }
    Ok(opts)
}

fn read_source(path: &str) -> Result<String, InterpretError> {
    let src = std::fs::read_to_string(path)?;
    // 파일 끝에 줄바꿈이 없으면 추가
    Ok(if src.ends_with('\n') { src } else { format!("{}\n", src) })
}

fn report_diagnostics(path: &str, src: &str, diagnostics: &[lib::Diagnostic]) {
    for diag in diagnostics {
        eprint!("{}", diag.format(path, src, "Syntax error", 1));
    }
}

fn new_interpreter(opts: &Options, argv0: &str) -> Interpreter {
    let mut config = VmConfig::default();
    config.flags |= opts.flags;
    let interp = Interpreter::new(config);
    {
        let mut vm = interp.lock();
        // -M 순서대로 앞에 쌓이므로 역순으로 넣습니다.
        for path in opts.module_paths.iter().rev() {
            system::add_module_path(&mut vm, path);
        }
        let mut argv = vec![argv0.to_string()];
        argv.extend(opts.script_args.iter().cloned());
        system::set_argv(&mut vm, &argv);
    }
    interp
}

fn default_out_path(path: &str) -> PathBuf {
    Path::new(path).with_extension("krkc")
}

fn run(opts: Options) -> Result<(), InterpretError> {
    if let Some(module) = &opts.module {
        let interp = new_interpreter(&opts, module);
        return interp.run_module(module);
    }

    let Some(path) = opts.path.clone() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    match opts.subcmd.as_deref().unwrap_or("run") {
        "run" => {
            let src = read_source(&path)?;
            let interp = new_interpreter(&opts, &path);
            match interp.run_source(&src, &path) {
                Err(InterpretError::Compile(diagnostics)) => {
                    report_diagnostics(&path, &src, &diagnostics);
                    Err(InterpretError::Compile(diagnostics))
                }
                other => other,
            }
        }
        "compile" => {
            let src = read_source(&path)?;
            let proto = lib::compile_source(&src, &path).map_err(|diagnostics| {
                report_diagnostics(&path, &src, &diagnostics);
                InterpretError::Compile(diagnostics)
            })?;
            if opts.flags.contains(VmFlags::DISASSEMBLE_ON_COMPILE) {
                eprint!("{}", lib::vm::disasm::disassemble(&proto));
            }
            let out = opts.out_path.map(PathBuf::from).unwrap_or_else(|| default_out_path(&path));
            lib::save_code(&proto, &out)?;
            println!("wrote {}", out.display());
            Ok(())
        }
        "exec" => {
            let proto = lib::load_code(Path::new(&path))?;
            let interp = new_interpreter(&opts, &path);
            interp.run_proto(&proto)
        }
        "disasm" => {
            let proto = if path.ends_with(".krkc") {
                lib::load_code(Path::new(&path))?
            } else {
                let src = read_source(&path)?;
                lib::compile_source(&src, &path).map_err(|diagnostics| {
                    report_diagnostics(&path, &src, &diagnostics);
                    InterpretError::Compile(diagnostics)
                })?
            };
            print!("{}", lib::vm::disasm::disassemble(&proto));
            Ok(())
        }
        _ => Ok(()),
    }
}

fn init_logging(flags: VmFlags) {
    // -t는 명령 단위 trace를 켭니다.
    let default = if flags.contains(VmFlags::TRACE_EXECUTION) { "warn,kuroko::vm=trace" } else { "warn" };
    let filter = EnvFilter::try_from_env("KUROKO_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let opts = match parse_args(env::args().skip(1).collect()) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };
    init_logging(opts.flags);

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        // 트레이스백과 진단은 이미 stderr에 출력됨
        Err(InterpretError::Uncaught(_)) | Err(InterpretError::Compile(_)) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("kuroko: {}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_then_script_args() {
        let opts = parse_args(args(&["-g", "-t", "run", "main.krk", "-d", "x"])).unwrap();
        assert!(opts.flags.contains(VmFlags::ENABLE_STRESS_GC | VmFlags::TRACE_EXECUTION));
        assert!(!opts.flags.contains(VmFlags::DISASSEMBLE_ON_COMPILE));
        assert_eq!(opts.subcmd.as_deref(), Some("run"));
        assert_eq!(opts.path.as_deref(), Some("main.krk"));
        assert_eq!(opts.script_args, vec!["-d", "x"]);
    }

    #[test]
    fn test_module_mode_and_paths() {
        let opts = parse_args(args(&["-M", "lib", "-M", "vendor", "-m", "tools.fmt", "a", "b"])).unwrap();
        assert_eq!(opts.module.as_deref(), Some("tools.fmt"));
        assert_eq!(opts.module_paths, vec!["lib", "vendor"]);
        assert_eq!(opts.script_args, vec!["a", "b"]);
    }

    #[test]
    fn test_compile_output_path() {
        let opts = parse_args(args(&["compile", "prog.krk", "-o", "out.krkc"])).unwrap();
        assert_eq!(opts.out_path.as_deref(), Some("out.krkc"));
        assert!(opts.script_args.is_empty());
        assert_eq!(default_out_path("dir/prog.krk"), PathBuf::from("dir/prog.krkc"));
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_args(args(&["-x"])).is_err());
        assert!(parse_args(args(&["-m"])).is_err());
    }
}
