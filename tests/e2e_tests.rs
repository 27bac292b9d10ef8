use kuroko::runtime_io::BufferIo;
use kuroko::vm::builtins::system;
use kuroko::{InterpretError, Interpreter, VmConfig, VmFlags};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};

/// E2E 통합 테스트: 소스를 컴파일해 `BufferIo`로 실행하고 출력을 비교합니다.
/// 모든 시나리오는 stress GC로 한 번 더 실행되어 같은 출력을 내야 합니다.

struct Outcome {
    result: Result<(), InterpretError>,
    stdout: String,
    stderr: String,
}

fn interpreter(flags: VmFlags, io: &BufferIo) -> Interpreter {
    let mut config = VmConfig::default();
    config.flags |= flags;
    Interpreter::with_io(config, Box::new(io.clone()))
}

fn run_with(source: &str, flags: VmFlags, inputs: &[&str]) -> Outcome {
    let io = BufferIo::new();
    for input in inputs {
        io.push_input_line(*input);
    }
    let interp = interpreter(flags, &io);
    let result = interp.run_source(source, "<test>");
    Outcome {
        result,
        stdout: io.get_output(),
        stderr: io.get_errors(),
    }
}

/// 일반 실행과 stress GC 실행의 출력이 모두 `expected`인지 확인합니다.
fn check(source: &str, expected: &str) {
    for flags in [VmFlags::empty(), VmFlags::ENABLE_STRESS_GC] {
        let outcome = run_with(source, flags, &[]);
        assert!(
            outcome.result.is_ok(),
            "program failed under {:?}: {:?}\nstderr:\n{}",
            flags,
            outcome.result,
            outcome.stderr
        );
        assert_eq!(outcome.stdout, expected, "flags: {:?}", flags);
    }
}

/// 잡히지 않은 예외로 끝나야 하는 프로그램: (stdout, traceback)
fn check_uncaught(source: &str) -> (String, String) {
    let outcome = run_with(source, VmFlags::empty(), &[]);
    match outcome.result {
        Err(InterpretError::Uncaught(text)) => (outcome.stdout, text),
        other => panic!("expected an uncaught exception, got {:?}", other),
    }
}

// ========== 기본 시나리오 ==========

#[test]
fn test_arithmetic_precedence() {
    check("print(1+2*3)\n", "7\n");
}

#[test]
fn test_list_append() {
    check("l = [1,2,3]; l.append(4); print(l)\n", "[1, 2, 3, 4]\n");
}

#[test]
fn test_dict_subscript() {
    check("d = {1:'a', 2:'b'}; print(d[2])\n", "b\n");
}

#[test]
fn test_method_call() {
    check("class A:\n def f(self): return 42\nprint(A().f())\n", "42\n");
}

#[test]
fn test_generator_loop() {
    check("def g():\n  yield 1\n  yield 2\nfor x in g(): print(x)\n", "1\n2\n");
}

#[test]
fn test_except_binds_exception() {
    check(
        "try:\n  raise ValueError('x')\nexcept ValueError as e:\n  print(e)\n",
        "x\n",
    );
}

#[test]
fn test_recursive_list_repr() {
    check("l=[]; l.append(l); print(l)\n", "[[...]]\n");
}

// ========== 언어 기능 ==========

#[test]
fn test_closures_share_captured_variable() {
    let source = "\
def counter():
    n = 0
    def inc():
        nonlocal n
        n += 1
        return n
    def get():
        return n
    return inc, get
inc, get = counter()
inc()
inc()
print(get(), inc())
";
    check(source, "2 3\n");
}

#[test]
fn test_keyword_and_star_arguments() {
    let source = "\
def f(a, b=2, *rest, key=None, **extra):
    return [a, b, rest, key, sorted(extra.keys())]
print(f(1))
print(f(1, 3, 4, 5, key='k', z=1, y=2))
args = (7, 8)
print(f(*args, **{'key': 0}))
";
    check(
        source,
        "[1, 2, (), None, []]\n[1, 3, (4, 5), 'k', ['y', 'z']]\n[7, 8, (), 0, []]\n",
    );
}

#[test]
fn test_missing_argument_error() {
    let (_, traceback) = check_uncaught("def f(a, b):\n    return a\nf(1)\n");
    assert!(traceback.ends_with("f() takes exactly 2 arguments (1 given)"), "{}", traceback);
}

#[test]
fn test_inheritance_and_super() {
    let source = "\
class Animal:
    def __init__(self, name):
        self.name = name
    def speak(self):
        return self.name + ' makes a sound'
class Dog(Animal):
    def __init__(self, name):
        super().__init__(name)
        self.tricks = []
    def speak(self):
        return super().speak() + ' (woof)'
d = Dog('rex')
print(d.speak())
print(isinstance(d, Animal), issubclass(Dog, Animal), type(d).__name__)
";
    check(source, "rex makes a sound (woof)\nTrue True Dog\n");
}

#[test]
fn test_dunder_methods() {
    let source = "\
class V:
    def __init__(self, x, y):
        self.x = x
        self.y = y
    def __add__(self, other):
        return V(self.x + other.x, self.y + other.y)
    def __eq__(self, other):
        return self.x == other.x and self.y == other.y
    def __repr__(self):
        return 'V(' + str(self.x) + ', ' + str(self.y) + ')'
    def __len__(self):
        return 2
print(V(1, 2) + V(3, 4))
print(V(1, 1) == V(1, 1), len(V(0, 0)))
print([V(5, 6)])
";
    check(source, "V(4, 6)\nTrue 2\n[V(5, 6)]\n");
}

#[test]
fn test_not_implemented_falls_back_to_reflected() {
    let source = "\
class Left:
    def __add__(self, other):
        return NotImplemented
class Right:
    def __radd__(self, other):
        return 'radd'
print(Left() + Right())
print(NotImplemented, Left().__add__(1) is NotImplemented)
try:
    Left() + 1
except TypeError as e:
    print('TypeError', e)
";
    check(
        source,
        "radd\nNotImplemented True\nTypeError unsupported operand types for +: 'Left' and 'int'\n",
    );
}

#[test]
fn test_failing_repr_does_not_poison_later_reprs() {
    let source = "\
class Flaky:
    def __init__(self):
        self.failed = False
    def __repr__(self):
        if not self.failed:
            self.failed = True
            raise ValueError('repr failed')
        return 'Flaky()'
r = Flaky()
items = [r]
try:
    print(items)
except ValueError as e:
    print('caught', e)
print(items)
print(repr(r), [items, items])
";
    check(source, "caught repr failed\n[Flaky()]\nFlaky() [[Flaky()], [Flaky()]]\n");
}

#[test]
fn test_try_finally_ordering() {
    let source = "\
def f():
    try:
        return 'body'
    finally:
        print('cleanup')
print(f())
for i in range(3):
    try:
        if i == 1:
            continue
        print('i', i)
    finally:
        print('finally', i)
";
    check(
        source,
        "cleanup\nbody\ni 0\nfinally 0\nfinally 1\ni 2\nfinally 2\n",
    );
}

#[test]
fn test_nested_exception_handlers() {
    let source = "\
def risky(n):
    if n == 0:
        raise KeyError('zero')
    return 10 // n
results = []
for n in [2, 0, 5]:
    try:
        results.append(risky(n))
    except ValueError:
        results.append('value')
    except KeyError as e:
        results.append('key:' + str(e))
print(results)
try:
    try:
        1 // 0
    except ZeroDivisionError:
        raise
except Exception as e:
    print(type(e).__name__, e)
";
    check(
        source,
        "[5, 'key:zero', 2]\nZeroDivisionError integer division or modulo by zero\n",
    );
}

#[test]
fn test_uncaught_traceback_lists_frames() {
    let source = "\
def inner():
    raise ValueError('bad value')
def outer():
    inner()
print('before')
outer()
";
    let (stdout, traceback) = check_uncaught(source);
    assert_eq!(stdout, "before\n");
    assert!(traceback.starts_with("Traceback (most recent call last):\n"), "{}", traceback);
    let outer = traceback.find("line 4, in outer").expect("outer frame");
    let inner = traceback.find("line 2, in inner").expect("inner frame");
    assert!(outer < inner, "most recent call should come last:\n{}", traceback);
    assert!(traceback.contains("    raise ValueError('bad value')\n"), "{}", traceback);
    assert!(traceback.ends_with("ValueError: bad value"), "{}", traceback);
}

#[test]
fn test_reraise_keeps_faulting_line() {
    let (_, traceback) = check_uncaught("try:\n    x = undefined_thing\nexcept TypeError:\n    pass\n");
    assert!(traceback.contains("line 2, in <module>\n    x = undefined_thing\n"), "{}", traceback);
    assert!(!traceback.contains("line 3"), "{}", traceback);
    assert!(traceback.ends_with("NameError: name 'undefined_thing' is not defined"), "{}", traceback);

    let source = "\
def f():
    try:
        return missing_name
    finally:
        print('cleanup')
f()
";
    let (stdout, traceback) = check_uncaught(source);
    assert_eq!(stdout, "cleanup\n");
    let outer = traceback.find("line 6, in <module>").expect("module frame");
    let inner = traceback.find("line 3, in f").expect("function frame");
    assert!(outer < inner, "{}", traceback);
    assert!(!traceback.contains("line 5"), "{}", traceback);
}

#[test]
fn test_comprehensions_and_builtins() {
    let source = "\
squares = [n * n for n in range(6) if n % 2 == 0]
print(squares)
index = {w: len(w) for w in ['a', 'bb', 'ccc']}
print(index)
print(sum(squares), min(squares), max(squares))
print(list(enumerate('ab')), list(zip([1, 2], 'xy')))
print(sorted([3, 1, 2]), any([0, 1]), all([]))
";
    check(
        source,
        "[0, 4, 16]\n{'a': 1, 'bb': 2, 'ccc': 3}\n20 0 16\n[(0, 'a'), (1, 'b')] [(1, 'x'), (2, 'y')]\n[1, 2, 3] True True\n",
    );
}

#[test]
fn test_unpacking_and_slices() {
    let source = "\
a, (b, c) = 1, (2, 3)
print(a, b, c)
xs = list(range(10))
print(xs[2:5], xs[::3], xs[-1])
xs[0] = 'first'
del xs[1]
print(xs[:3])
s = 'hello world'
print(s[:5].upper(), s.split(' '), '-'.join(['a', 'b']))
";
    check(
        source,
        "1 2 3\n[2, 3, 4] [0, 3, 6, 9] 9\n['first', 2, 3]\nHELLO ['hello', 'world'] a-b\n",
    );
}

#[test]
fn test_unpack_length_mismatch() {
    let (_, traceback) = check_uncaught("a, b = [1, 2, 3]\n");
    assert!(traceback.contains("ValueError"), "{}", traceback);
}

#[test]
fn test_generator_send_and_exhaustion() {
    let source = "\
def echo():
    received = yield 'ready'
    while received:
        received = yield received * 2
g = echo()
print(next(g))
print(g.send(5))
print(g.send(7))
print(list(g))
def count(n):
    i = 0
    while i < n:
        yield i
        i += 1
print(list(count(4)), sum(count(5)))
";
    check(source, "ready\n10\n14\n[]\n[0, 1, 2, 3] 10\n");
}

#[test]
fn test_generator_closures_follow_live_locals() {
    let source = "\
def gen():
    x = 1
    f = lambda: x
    yield f
    x = 2
    yield f
g = gen()
f = next(g)
print(f())
f2 = next(g)
print(f(), f is f2)
def counter():
    x = 0
    def bump():
        nonlocal x
        x = 5
    yield bump
    yield x
c = counter()
bump = next(c)
bump()
print(next(c))
def pair():
    v = 0
    def get():
        return v
    def put(n):
        nonlocal v
        v = n
    yield get
    yield put
    yield v
p = pair()
get = next(p)
put = next(p)
put(9)
print(get(), next(p))
def finished():
    n = 10
    def late():
        return n
    yield late
    n = 11
g = finished()
late = next(g)
print(list(g), late())
";
    check(source, "1\n2 True\n5\n9 9\n[] 11\n");
}

#[test]
fn test_lambda_decorator_and_properties() {
    let source = "\
def twice(f):
    return lambda x: f(f(x))
@twice
def inc(x):
    return x + 1
print(inc(5))
class Temp:
    def __init__(self, c):
        self.c = c
    @property
    def f(self):
        return self.c * 9 // 5 + 32
    @staticmethod
    def unit():
        return 'F'
    @classmethod
    def name(cls):
        return cls.__name__
t = Temp(100)
print(t.f, Temp.unit(), t.name())
";
    check(source, "7\n212 F Temp\n");
}

#[test]
fn test_strings_and_bytes() {
    let source = "\
s = 'Kuroko'
print(len(s), s.lower(), s.startswith('Ku'), s.find('ko'), s * 2)
print(repr('it\\'s'), str(3.5), int('42') + 1)
b = 'héllo'.encode()
print(len(b), b.decode() == 'héllo')
print(ord('A'), chr(97))
";
    check(source, "6 kuroko True 4 KurokoKuroko\n\"it's\" 3.5 43\n6 True\n65 a\n");
}

#[test]
fn test_dict_operations() {
    let source = "\
d = {}
d['a'] = 1
d.setdefault('b', 2)
d.update({'c': 3})
print(d.get('a'), d.get('z', 0), d.pop('b'), sorted(d.items()))
print(dict(d.items()) == d, 'a' in d, 'b' in d)
del d['a']
print(d, len(d))
";
    check(
        source,
        "1 0 2 [('a', 1), ('c', 3)]\nTrue True False\n{'c': 3} 1\n",
    );
}

#[test]
fn test_missing_key_and_attribute_errors() {
    let source = "\
try:
    {}['nope']
except KeyError as e:
    print('key', repr(e))
class A:
    pass
try:
    A().missing
except AttributeError:
    print('attr')
print(hasattr(A(), 'x'), getattr(A(), 'x', 'default'))
";
    check(source, "key KeyError('nope')\nattr\nFalse default\n");
}

#[test]
fn test_assert_statement() {
    let (_, traceback) = check_uncaught("assert 1 == 2, 'math is broken'\n");
    assert!(traceback.ends_with("AssertionError: math is broken"), "{}", traceback);
}

#[test]
fn test_global_and_del() {
    let source = "\
total = 0
def add(n):
    global total
    total += n
add(3)
add(4)
print(total)
x = 1
del x
try:
    print(x)
except NameError:
    print('gone')
";
    check(source, "7\ngone\n");
}

#[test]
fn test_while_else_free_loops_with_break() {
    let source = "\
i = 0
while True:
    i += 1
    if i > 3:
        break
print(i)
found = None
for n in [1, 3, 4, 5]:
    if n % 2 == 0:
        found = n
        break
print(found)
";
    check(source, "4\n4\n");
}

#[test]
fn test_integer_repr_roundtrip() {
    check("print(repr(-123456789), 2 ** 10, 7 // 2, -7 // 2, 7 % 3, 1 / 4)\n", "-123456789 1024 3 -4 1 0.25\n");
}

#[test]
fn test_set_type() {
    let source = "\
s = set([3, 1, 3])
s.add(2)
print(len(s), 2 in s, 5 in s, sorted(s))
print(sorted(s & set([2, 3, 4])), sorted(s | set([9])), sorted(s - set([1])), sorted(s ^ set([1, 7])))
s.discard(1)
s.remove(2)
print(s, set() == set(), s == set([3]), set())
try:
    s.remove(42)
except KeyError as e:
    print('KeyError', e)
try:
    s.add([1])
except TypeError as e:
    print('TypeError', e)
class Tags(set):
    def add_all(self, *items):
        for item in items:
            self.add(item)
t = Tags()
t.add_all('a', 'b', 'a')
print(len(t), isinstance(t, set), sorted(t))
";
    check(
        source,
        "3 True False [1, 2, 3]\n\
         [2, 3] [1, 2, 3, 9] [2, 3] [2, 3, 7]\n\
         {3} True True set()\n\
         KeyError 42\n\
         TypeError unhashable type: 'list'\n\
         2 True ['a', 'b']\n",
    );
}

#[test]
fn test_ranges_near_integer_limits() {
    let source = "\
big = 9223372036854775807
print(list(range(big - 7, big, 3)))
print(list(range(-big, -big - 1, -5)))
r = range(-big - 1, big)
print(r[0], r[-1], big - 1 in r, bool(r))
try:
    print(len(r))
except ValueError as e:
    print('ValueError', e)
print(len(range(-big, big, big)))
";
    check(
        source,
        "[9223372036854775800, 9223372036854775803, 9223372036854775806]\n\
         [-9223372036854775807]\n\
         -9223372036854775808 9223372036854775806 True True\n\
         ValueError range() result has too many items\n\
         2\n",
    );
}

#[test]
fn test_oversized_repetition_and_zero_power() {
    let source = "\
big = 9223372036854775807
for build in [lambda: [0] * big, lambda: 'ab' * 4611686018427387904, lambda: (1, 2) * big]:
    try:
        build()
    except ValueError as e:
        print('ValueError', e)
print([1, 2] * 2, 'ab' * 0, [0] * -3)
for base in [0, 0.0]:
    try:
        print(base ** -1)
    except ZeroDivisionError as e:
        print('ZeroDivisionError', e)
print(2 ** -1, 2 ** 10)
";
    check(
        source,
        "ValueError repeated sequence is too long\n\
         ValueError repeated sequence is too long\n\
         ValueError repeated sequence is too long\n\
         [1, 2, 1, 2]  []\n\
         ZeroDivisionError 0.0 cannot be raised to a negative power\n\
         ZeroDivisionError 0.0 cannot be raised to a negative power\n\
         0.5 1024\n",
    );
}

#[test]
fn test_compile_errors_are_reported() {
    let outcome = run_with("x = (\n", VmFlags::empty(), &[]);
    assert!(matches!(outcome.result, Err(InterpretError::Compile(ref d)) if !d.is_empty()));
    assert_eq!(outcome.stdout, "");
}

#[test]
fn test_interrupt_raises_keyboard_interrupt() {
    let io = BufferIo::new();
    let interp = interpreter(VmFlags::empty(), &io);
    let handle = interp.clone();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        handle.interrupt();
    });
    let result = interp.run_source(
        "try:\n    while True:\n        pass\nexcept KeyboardInterrupt:\n    print('stopped')\n",
        "<test>",
    );
    trigger.join().unwrap();
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(io.get_output(), "stopped\n");
}

// ========== 입력 ==========

#[test]
fn test_input_reads_lines() {
    let outcome = run_with(
        "name = input('name? ')\nage = int(input())\nprint(name, age + 1)\n",
        VmFlags::empty(),
        &["Alice", "30"],
    );
    assert!(outcome.result.is_ok(), "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "name? Alice 31\n");
}

#[test]
fn test_input_eof_raises() {
    let outcome = run_with(
        "try:\n    input()\nexcept IOError:\n    print('eof')\n",
        VmFlags::empty(),
        &[],
    );
    assert!(outcome.result.is_ok(), "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "eof\n");
}

// ========== 모듈 ==========

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kuroko-e2e-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_import_module_and_package() {
    let dir = scratch_dir("import");
    fs::write(dir.join("helper.krk"), "VALUE = 41\ndef bump(n):\n    return n + 1\nprint('loading helper')\n").unwrap();
    fs::create_dir_all(dir.join("pkg")).unwrap();
    fs::write(dir.join("pkg").join("__init__.krk"), "NAME = 'pkg'\n").unwrap();
    fs::write(dir.join("pkg").join("sub.krk"), "def hello():\n    return 'hi from sub'\n").unwrap();

    let io = BufferIo::new();
    let interp = interpreter(VmFlags::empty(), &io);
    system::add_module_path(&mut interp.lock(), &dir.to_string_lossy());
    let source = "\
import helper
import helper
from helper import bump as b
import pkg.sub
from pkg import NAME
print(b(helper.VALUE), NAME, pkg.sub.hello())
";
    let result = interp.run_source(source, "<test>");
    let _ = fs::remove_dir_all(&dir);
    assert!(result.is_ok(), "{:?}\n{}", result, io.get_errors());
    assert_eq!(io.get_output(), "loading helper\n42 pkg hi from sub\n");
}

#[test]
fn test_import_missing_module() {
    let (_, traceback) = check_uncaught("import no_such_module_here\n");
    assert!(traceback.contains("ImportError"), "{}", traceback);
}

#[test]
fn test_syntax_error_in_imported_module() {
    let dir = scratch_dir("syntax");
    fs::write(dir.join("broken.krk"), "def (:\n").unwrap();
    let io = BufferIo::new();
    let interp = interpreter(VmFlags::empty(), &io);
    system::add_module_path(&mut interp.lock(), &dir.to_string_lossy());
    let result = interp.run_source(
        "try:\n    import broken\nexcept SyntaxError as e:\n    print('syntax error caught')\n",
        "<test>",
    );
    let _ = fs::remove_dir_all(&dir);
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(io.get_output(), "syntax error caught\n");
}

#[test]
fn test_system_module() {
    check(
        "import kuroko\nprint(type(kuroko.module_paths).__name__, type(kuroko.version).__name__)\n",
        "list str\n",
    );
}

// ========== GC ==========

#[test]
fn test_gc_module_collects_cycles() {
    let source = "\
import gc
class Node:
    def __init__(self):
        self.other = None
for i in range(50):
    a = Node()
    b = Node()
    a.other = b
    b.other = a
a = None
b = None
freed = gc.collect()
stats = gc.stats()
print(type(freed).__name__, stats['collections'] > 0, sorted(stats.keys()))
";
    check(source, "int True ['bytes_allocated', 'collections', 'next_gc']\n");
}

#[test]
fn test_interning_under_stress_gc() {
    let source = "\
parts = []
for i in range(20):
    parts.append('k' + str(i))
d = {}
for p in parts:
    d[p] = len(p)
print(d['k1' + '9'], d['k3'], 'k' + '5' is parts[5])
";
    check(source, "3 2 True\n");
}

// ========== 스레드 ==========

#[cfg(feature = "threading")]
#[test]
fn test_threads_run_and_join() {
    let source = "\
import threading
results = []
def work(n):
    total = 0
    for i in range(n):
        total += i
    results.append(total)
threads = [threading.Thread(target=work, args=(k * 100,)) for k in range(1, 4)]
for t in threads:
    t.start()
for t in threads:
    t.join()
print(sorted(results))
class Worker(threading.Thread):
    def run(self):
        results.append('custom')
w = Worker()
w.start()
w.join()
print(results[-1], w.is_alive())
";
    check(source, "[4950, 19900, 44850]\ncustom False\n");
}

// ========== 스크립트 프로그램 ==========

fn program_paths() -> Vec<PathBuf> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/programs");
    let mut programs: Vec<PathBuf> = fs::read_dir(&dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("krk"))
                .collect()
        })
        .unwrap_or_default();
    programs.sort();
    programs
}

macro_rules! test_program {
    ($test_name:ident, $filename:literal) => {
        #[test]
        fn $test_name() {
            let source = include_str!(concat!("programs/", $filename, ".krk"));
            let expected = include_str!(concat!("programs/", $filename, ".out"));
            check(source, expected);
        }
    };
}

test_program!(test_program_fib, "fib");
test_program!(test_program_classes, "classes");
test_program!(test_program_closures, "closures");
test_program!(test_program_exceptions, "exceptions");
test_program!(test_program_generators, "generators");
test_program!(test_program_collections, "collections");

#[test]
fn test_every_program_has_expected_output() {
    let programs = program_paths();
    assert!(!programs.is_empty(), "no programs under tests/programs");
    for path in programs {
        assert!(path.with_extension("out").is_file(), "{} has no .out file", path.display());
    }
}
