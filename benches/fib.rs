use instant::Instant;
use kuroko::runtime_io::BufferIo;
use kuroko::{Interpreter, VmConfig, VmFlags};

const RUNS: u32 = 5;

fn main() {
    // 테스트 프로그램: Fibonacci
    let source = r#"
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)

result = 0
for i in range(20):
    result = fib(20)

print(result)
"#;

    println!("=== Kuroko Benchmark ===\n");
    println!("Test: fib(20) called 20 times, {} runs\n", RUNS);

    // 컴파일
    let proto = match kuroko::compile_source(source, "<bench>") {
        Ok(proto) => proto,
        Err(errors) => {
            eprintln!("Compilation error: {:?}", errors);
            return;
        }
    };

    for (label, flags) in [("default", VmFlags::empty()), ("stress gc", VmFlags::ENABLE_STRESS_GC)] {
        let mut total = 0.0;
        for _ in 0..RUNS {
            let io = BufferIo::new();
            let mut config = VmConfig::default();
            config.flags |= flags;
            let interp = Interpreter::with_io(config, Box::new(io.clone()));

            // 실행 및 시간 측정
            let start = Instant::now();
            if let Err(e) = interp.run_proto(&proto) {
                eprintln!("Runtime error: {}", e);
                return;
            }
            total += start.elapsed().as_secs_f64() * 1000.0;
            assert_eq!(io.get_output(), "6765\n");
        }
        println!("[{}] average: {:.2}ms", label, total / RUNS as f64);
    }
}
