//! Assemble classes and run them on a real JVM
//!
//! These tests are skipped (with a warning) when no `java` executable is on the path.

use classasm::jvm::code::opcodes::*;
use classasm::jvm::model::{ClassModel, InvokeKind, MethodDescriptor};
use classasm::jvm::*;
use std::fs;
use std::process::Command;

fn java_available() -> bool {
    Command::new("java")
        .arg("-version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Write the class to a temporary directory and run its `main`, returning the standard output
fn run_class(name: &str, bytes: &[u8]) -> Option<String> {
    if !java_available() {
        eprintln!("skipping: no java executable found");
        return None;
    }
    let dir = tempfile::tempdir().expect("temporary directory");
    fs::write(dir.path().join(format!("{}.class", name)), bytes).expect("write class file");
    let output = Command::new("java")
        .arg("-cp")
        .arg(dir.path())
        .arg(name)
        .output()
        .expect("run java");
    assert!(
        output.status.success(),
        "java failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Some(String::from_utf8(output.stdout).expect("utf-8 output"))
}

struct Probe<'r> {
    symbols: &'r SymbolTable,
    class: SymbolId,
}

impl<'r> Probe<'r> {
    fn new(symbols: &'r SymbolTable, name: &str) -> Probe<'r> {
        Probe {
            symbols,
            class: symbols.intern_name(name),
        }
    }

    fn model(&self) -> ClassModel<'r> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut class = ClassModel::new(self.symbols);
        class
            .set_class_name(ClassAccessFlags::PUBLIC, self.class)
            .expect("class name");
        class
    }

    fn static_method(&self, name: &str, parameters: usize) -> SymbolId {
        self.symbols
            .declare_method(
                self.class,
                name,
                MethodType {
                    parameters: vec![FieldType::int(); parameters],
                    return_type: Some(FieldType::int()),
                },
            )
            .expect("method symbol")
    }

    fn begin<'c>(
        &self,
        class: &'c mut ClassModel<'r>,
        name: &str,
        parameters: &[&str],
    ) -> Result<MethodDescriptor<'c, 'r>, Error> {
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        let mut method = class.add_method_description(flags, name, Some(FieldType::int()), &[])?;
        for parameter in parameters {
            method.add_parameter(parameter, FieldType::int())?;
        }
        Ok(method)
    }

    /// `main` printing the result of each call, one per line
    fn add_main(
        &self,
        class: &mut ClassModel<'r>,
        calls: &[(SymbolId, &[i32])],
    ) -> Result<(), Error> {
        let symbols = self.symbols;
        let string = FieldType::object(symbols.intern_name("java.lang.String"));
        let print_stream = symbols.intern_name("java.io.PrintStream");
        let system = symbols.intern_name("java.lang.System");
        let out = symbols.declare_field(system, "out", FieldType::object(print_stream));
        let println = symbols.declare_method(
            print_stream,
            "println",
            MethodType {
                parameters: vec![FieldType::int()],
                return_type: None,
            },
        )?;

        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        let mut main = class.add_method_description(flags, "main", None, &[])?;
        main.add_parameter("args", FieldType::object(symbols.array_of(string)?))?;
        for (method, arguments) in calls {
            main.get_static(out)?;
            for argument in arguments.iter() {
                main.iconst(*argument)?;
            }
            main.invoke(InvokeKind::Static, *method)?;
            main.invoke(InvokeKind::Virtual, println)?;
        }
        main.emit_return()?;
        main.complete()
    }
}

/// `x == 0 ? 0 : 1`, with `padding` pairs of `sipush`/`pop` between the test and the result
fn add_skip<'r>(
    probe: &Probe<'r>,
    class: &mut ClassModel<'r>,
    padding: usize,
) -> Result<(), Error> {
    let mut method = probe.begin(class, "skip", &["x"])?;
    let zero = method.fresh_label()?;
    method.load_variable("x")?;
    method.branch(IFEQ, zero)?;
    for _ in 0..padding {
        method.iconst(1000)?;
        method.op(POP)?;
    }
    method.iconst(1)?;
    method.emit_return()?;
    method.place_label(zero)?;
    method.iconst(0)?;
    method.emit_return()?;
    method.complete()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn add_two_ints() -> Result<(), Error> {
    let symbols = SymbolTable::new();
    let probe = Probe::new(&symbols, "AddProbe");
    let mut class = probe.model();

    let mut add = probe.begin(&mut class, "add", &["a", "b"])?;
    add.load(Operand::Int, 0)?;
    add.load(Operand::Int, 1)?;
    add.op(IADD)?;
    add.emit_return()?;
    add.complete()?;
    probe.add_main(&mut class, &[(probe.static_method("add", 2), &[2, 3])])?;

    let mut bytes = vec![];
    class.dump(&mut bytes)?;
    if let Some(output) = run_class("AddProbe", &bytes) {
        assert_eq!(output.trim(), "5");
    }
    Ok(())
}

#[test]
fn short_forward_branch() -> Result<(), Error> {
    let symbols = SymbolTable::new();
    let probe = Probe::new(&symbols, "ShortBranch");
    let mut class = probe.model();
    add_skip(&probe, &mut class, 16)?;
    let skip = probe.static_method("skip", 1);
    probe.add_main(&mut class, &[(skip, &[0]), (skip, &[7])])?;

    let mut bytes = vec![];
    class.dump(&mut bytes)?;

    // `ifeq` over 16 four byte pairs, `iconst_1` and `ireturn`
    assert!(contains(&bytes, &[ILOAD_0, IFEQ, 0, 69]));
    if let Some(output) = run_class("ShortBranch", &bytes) {
        assert_eq!(output.lines().collect::<Vec<_>>(), vec!["0", "1"]);
    }
    Ok(())
}

#[test]
fn widened_forward_branch() -> Result<(), Error> {
    let symbols = SymbolTable::new();
    let probe = Probe::new(&symbols, "WideBranch");
    let mut class = probe.model();
    add_skip(&probe, &mut class, 8200)?;
    let skip = probe.static_method("skip", 1);
    probe.add_main(&mut class, &[(skip, &[0]), (skip, &[7])])?;

    let mut bytes = vec![];
    class.dump(&mut bytes)?;

    // Inverted test hopping over a `goto_w`
    assert!(contains(&bytes, &[ILOAD_0, IFNE, 0, 8, GOTO_W]));
    assert!(!contains(&bytes, &[ILOAD_0, IFEQ]));
    if let Some(output) = run_class("WideBranch", &bytes) {
        assert_eq!(output.lines().collect::<Vec<_>>(), vec!["0", "1"]);
    }
    Ok(())
}

#[test]
fn switches_and_handlers() -> Result<(), Error> {
    let symbols = SymbolTable::new();
    let arithmetic = symbols.intern_name("java.lang.ArithmeticException");
    let probe = Probe::new(&symbols, "Dispatch");
    let mut class = probe.model();

    // Dense keys become a `tableswitch`
    let mut pick = probe.begin(&mut class, "pick", &["key"])?;
    let labels = [pick.fresh_label()?, pick.fresh_label()?, pick.fresh_label()?];
    let default = pick.fresh_label()?;
    pick.load_variable("key")?;
    pick.switch(&[(1, labels[0]), (2, labels[1]), (3, labels[2])], default)?;
    for (label, result) in labels.iter().zip([10, 20, 30]) {
        pick.place_label(*label)?;
        pick.iconst(result)?;
        pick.emit_return()?;
    }
    pick.place_label(default)?;
    pick.iconst(0)?;
    pick.emit_return()?;
    pick.complete()?;

    // Sparse keys become a `lookupswitch`
    let mut sparse = probe.begin(&mut class, "sparse", &["key"])?;
    let hit = sparse.fresh_label()?;
    let miss = sparse.fresh_label()?;
    sparse.load_variable("key")?;
    sparse.switch(&[(100_000, hit), (-5, hit), (7, hit)], miss)?;
    sparse.place_label(hit)?;
    sparse.iconst(1)?;
    sparse.emit_return()?;
    sparse.place_label(miss)?;
    sparse.iconst(-1)?;
    sparse.emit_return()?;
    sparse.complete()?;

    let mut guarded = probe.begin(&mut class, "guarded", &["divisor"])?;
    guarded.begin_try()?;
    guarded.iconst(10)?;
    guarded.load_variable("divisor")?;
    guarded.op(IDIV)?;
    guarded.emit_return()?;
    guarded.catch(&[arithmetic])?;
    guarded.op(POP)?;
    guarded.iconst(-1)?;
    guarded.emit_return()?;
    guarded.end_try()?;
    guarded.complete()?;

    let pick = probe.static_method("pick", 1);
    let sparse = probe.static_method("sparse", 1);
    let guarded = probe.static_method("guarded", 1);
    probe.add_main(
        &mut class,
        &[
            (pick, &[2]),
            (pick, &[9]),
            (sparse, &[100_000]),
            (sparse, &[8]),
            (guarded, &[2]),
            (guarded, &[0]),
        ],
    )?;

    let mut bytes = vec![];
    class.dump(&mut bytes)?;
    if let Some(output) = run_class("Dispatch", &bytes) {
        assert_eq!(
            output.lines().collect::<Vec<_>>(),
            vec!["20", "0", "1", "-1", "5", "-1"]
        );
    }
    Ok(())
}

#[test]
fn finally_runs_on_every_path() -> Result<(), Error> {
    let symbols = SymbolTable::new();
    let arithmetic = symbols.intern_name("java.lang.ArithmeticException");
    let probe = Probe::new(&symbols, "Settle");
    let mut class = probe.model();

    // r = 10 / d, or -1 when that throws, plus 100 from the `finally` code
    let mut settle = probe.begin(&mut class, "settle", &["d"])?;
    for name in ["r", "log"] {
        settle.add_variable(name, FieldType::int())?;
        settle.iconst(0)?;
        settle.store_variable(name)?;
    }
    let clauses: [&[SymbolId]; 1] = [&[arithmetic]];
    settle.try_catch_finally(
        &clauses,
        &mut |m| {
            m.iconst(10)?;
            m.load_variable("d")?;
            m.op(IDIV)?;
            m.store_variable("r")
        },
        &mut |m, _| {
            m.op(POP)?;
            m.iconst(-1)?;
            m.store_variable("r")
        },
        &mut |m| {
            m.iconst(100)?;
            m.store_variable("log")
        },
    )?;
    settle.load_variable("r")?;
    settle.load_variable("log")?;
    settle.op(IADD)?;
    settle.emit_return()?;
    settle.complete()?;

    let settle = probe.static_method("settle", 1);
    probe.add_main(&mut class, &[(settle, &[2]), (settle, &[0])])?;

    let mut bytes = vec![];
    class.dump(&mut bytes)?;
    if let Some(output) = run_class("Settle", &bytes) {
        assert_eq!(output.lines().collect::<Vec<_>>(), vec!["105", "99"]);
    }
    Ok(())
}
