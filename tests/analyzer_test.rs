use cinder_core::analyzer::{Analyzer, AnalyzerOptions};
use cinder_core::api::{AnalysisResult, Compiler};
use cinder_core::ast::{Context, DotKind, Env, JsCode, Node, Op, VarRef, WarningKind};
use cinder_core::error::{AnalysisError, CinderError};
use cinder_core::form::{Form, Keyword, Symbol};
use cinder_core::namespace::{MacroFn, NamespaceTable, CORE_NS, USER_NS};
use cinder_core::reader::read_string;
use std::rc::Rc;

fn analyze_ok(source: &str) -> AnalysisResult {
    Compiler::new()
        .analyze_str(source, Some("test.cin"))
        .unwrap_or_else(|err| panic!("{source}: {err}"))
}

fn last(source: &str) -> Node {
    analyze_ok(source).nodes.pop().unwrap()
}

fn analysis_error(source: &str) -> AnalysisError {
    match Compiler::new().analyze_str(source, Some("test.cin")) {
        Err(CinderError::Analysis(err)) => err,
        Err(other) => panic!("expected an analysis error, got {other:?}"),
        Ok(result) => panic!("expected an error, got {:?}", result.ops()),
    }
}

fn warning_kinds(source: &str) -> Vec<WarningKind> {
    analyze_ok(source).warnings.iter().map(|w| w.kind).collect()
}

#[test]
fn test_constants_carry_type_tags() {
    let node = last("\"s\"");
    assert!(matches!(node.op, Op::Constant { .. }));
    assert_eq!(node.tag.as_deref(), Some("string"));
    assert_eq!(last("42").tag.as_deref(), Some("number"));
    assert_eq!(last("nil").tag.as_deref(), Some("nil"));
}

#[test]
fn test_collections() {
    match last("{:a 1 \"b\" 2}").op {
        Op::Map { keys, simple_keys, .. } => {
            assert_eq!(keys.len(), 2);
            assert!(simple_keys);
        }
        other => panic!("unexpected {other:?}"),
    }
    match last("{[1] 2}").op {
        Op::Map { simple_keys, .. } => assert!(!simple_keys),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(last("[1 2]").op, Op::Vector { .. }));
    assert!(matches!(last("#{1 2}").op, Op::Set { .. }));
    match last("^:tagged [1]").op {
        Op::Meta { expr, .. } => assert!(matches!(expr.op, Op::Vector { .. })),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_if_arity_and_contexts() {
    match last("(if true 1 2)").op {
        Op::If { test, then, else_, unchecked } => {
            assert_eq!(test.env.context, Context::Expr);
            assert_eq!(then.env.context, Context::Statement);
            assert!(matches!(else_.op, Op::Constant { .. }));
            assert!(!unchecked);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(analysis_error("(if)").message().contains("Too few arguments to if"));
    assert!(analysis_error("(if 1 2 3 4)").message().contains("Too many arguments to if"));
}

#[test]
fn test_errors_are_located_once_at_the_innermost_form() {
    let err = analysis_error("(def ok 1)\n\n  (if)");
    match err {
        AnalysisError::Located { line, column, file, .. } => {
            assert_eq!(line, Some(3));
            assert_eq!(column, Some(3));
            assert_eq!(file.as_deref(), Some("test.cin"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match analysis_error("(do\n  (let* [x] x))") {
        AnalysisError::Located { line, message, .. } => {
            assert_eq!(line, Some(2));
            assert_eq!(message, "bindings must be vector of even number of elements");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_recur_arity_is_checked_against_innermost_frame() {
    let err = analysis_error("(loop* [a 1 b 2] (recur 1))");
    assert!(err.message().contains("recur argument count mismatch"), "{err}");
    let err = analysis_error("(fn* [x] (loop* [a 1] ((fn* [y z] (recur 1)) 1 2)))");
    assert!(err.message().contains("expected 2, got 1"), "{err}");
    assert!(analysis_error("(recur 1)").message().contains("Can't recur here"));
    assert!(analysis_error("(loop* [a 1] (let* [b (recur 2)] b))")
        .message()
        .contains("Can't recur here"));
}

#[test]
fn test_fn_records_recursion_and_arity() {
    match last("(fn* count-down [n] (if n (recur n) n))").op {
        Op::Fn { name, method, max_fixed_arity, variadic, .. } => {
            assert_eq!(name.unwrap().name, Symbol::simple("count-down"));
            assert!(method.recurs);
            assert_eq!(max_fixed_arity, 1);
            assert!(!variadic);
        }
        other => panic!("unexpected {other:?}"),
    }
    match last("(fn* [a & more] a)").op {
        Op::Fn { method, variadic, .. } => {
            assert!(variadic);
            assert_eq!(method.fixed_arity, 1);
            assert_eq!(method.params.len(), 2);
            assert!(!method.recurs);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(analysis_error("(fn* ([x] x) ([x y] x))")
        .message()
        .contains("single arity"));
    assert!(analysis_error("(fn* [a/b] 1)").message().contains("qualified"));
}

#[test]
fn test_defn_registers_fn_var() {
    let mut compiler = Compiler::new();
    let result = compiler
        .analyze_str("(defn add \"Adds.\" [a b] a)", None)
        .unwrap();
    match &result.nodes[0].op {
        Op::Def { name, init: Some(init), .. } => {
            assert_eq!(*name, Symbol::qualified(USER_NS, "add"));
            match &init.op {
                Op::Fn { def_name, .. } => assert_eq!(def_name.as_deref(), Some("add")),
                other => panic!("unexpected {other:?}"),
            }
        }
        other => panic!("unexpected {other:?}"),
    }
    let def = compiler.table().lookup_def(USER_NS, "add").unwrap();
    assert!(def.fn_var);
    assert_eq!(def.max_fixed_arity, Some(2));
    assert_eq!(def.method_params, vec![vec![Symbol::simple("a"), Symbol::simple("b")]]);
    assert_eq!(def.doc.as_deref(), Some("Adds."));
    assert_eq!(def.line, Some(1));
}

#[test]
fn test_def_validation() {
    assert!(analysis_error("(def a/b 1)").message().contains("ns-qualified"));
    assert!(analysis_error("(def 1 1)").message().contains("must be a symbol"));
    assert!(analysis_error("(def x 1 2)").message().contains("Docstring"));
    assert!(analysis_error("(def x \"d\" 1 2)").message().contains("Too many"));
}

#[test]
fn test_redefining_fn_var_with_value_warns_but_completes() {
    let mut compiler = Compiler::new();
    let result = compiler
        .analyze_str("(defn f [x] x)\n(def f 1)", None)
        .unwrap();
    assert_eq!(result.ops(), vec!["def", "def"]);
    let stale: Vec<_> = result
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::FnVarStale)
        .collect();
    assert_eq!(stale.len(), 1);
    assert!(stale[0].message.contains("no longer fn"));
    assert_eq!(stale[0].line, Some(2));
    assert!(!compiler.table().lookup_def(USER_NS, "f").unwrap().fn_var);
}

#[test]
fn test_redefining_value_as_fn_warns() {
    let mut compiler = Compiler::new();
    let result = compiler
        .analyze_str("(def x 1)\n(def x (fn* [] 1))", None)
        .unwrap();
    let kinds: Vec<_> = result.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(kinds, vec![WarningKind::FnVarStale]);
    assert!(result.warnings[0].message.contains("is now a fn"));
    assert_eq!(result.warnings[0].line, Some(2));
    assert!(compiler.table().lookup_def(USER_NS, "x").unwrap().fn_var);

    assert!(warning_kinds("(declare g)\n(defn g [] 1)").is_empty());
    assert!(warning_kinds("(defn h [] 1)\n(defn h [a] a)").is_empty());
}

#[test]
fn test_type_replacing_fn_var_warns() {
    for source in ["(defn f [] 1)\n(deftype* f [a])", "(defn f [] 1)\n(defrecord* f [a])"] {
        let mut compiler = Compiler::new();
        let result = compiler.analyze_str(source, None).unwrap();
        let kinds: Vec<_> = result.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::FnVarStale], "{source}");
        assert!(result.warnings[0].message.contains("no longer fn"));
        assert!(compiler.table().lookup_def(USER_NS, "f").unwrap().is_type);
    }
    assert!(warning_kinds("(deftype* T [a])\n(deftype* T [a b])").is_empty());
}

#[test]
fn test_redefinition_of_core_name_excludes_it() {
    let mut compiler = Compiler::new();
    let result = compiler.analyze_str("(def when 1) when", None).unwrap();
    assert!(result.warnings.iter().any(|w| w.kind == WarningKind::Redefinition));
    assert!(compiler.table().get(USER_NS).unwrap().excludes.contains("when"));
    match &result.nodes[1].op {
        Op::Var { name, .. } => assert_eq!(*name, Symbol::qualified(USER_NS, "when")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_dynamic_and_undeclared_warnings() {
    assert_eq!(warning_kinds("(def *x* 1)"), vec![WarningKind::DynamicNotDeclared]);
    assert!(warning_kinds("(def ^:dynamic *y* 1)").is_empty());
    let result = analyze_ok("(missing 1)");
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::UndeclaredVar);
    assert!(result.warnings[0].message.contains("cinder.user/missing"));
    assert!(warning_kinds("(declare later) (later)").is_empty());
}

#[test]
fn test_warning_toggles_come_from_options() {
    let options = AnalyzerOptions::from_json(r#"{"warn_on_undeclared": false}"#).unwrap();
    let result = Compiler::new()
        .with_options(options)
        .analyze_str("(missing 1)", None)
        .unwrap();
    assert!(result.warnings.is_empty());
}

#[test]
fn test_arity_and_deprecation_warnings() {
    assert_eq!(
        warning_kinds("(defn f [a b] a) (f 1)"),
        vec![WarningKind::ArityMismatch]
    );
    assert_eq!(
        warning_kinds("(defn g [a & r] a) (g)"),
        vec![WarningKind::ArityMismatch]
    );
    assert!(warning_kinds("(defn g [a & r] a) (g 1 2 3)").is_empty());
    assert_eq!(
        warning_kinds("(let* [h (fn* [x] x)] (h 1 2))"),
        vec![WarningKind::ArityMismatch]
    );
    assert_eq!(
        warning_kinds("(defn ^:deprecated old [] 1) (old)"),
        vec![WarningKind::Deprecated]
    );
    assert_eq!(
        warning_kinds("(def ^:deprecated legacy 1) legacy"),
        vec![WarningKind::Deprecated]
    );
}

#[test]
fn test_let_bindings_shadow() {
    let mut table = NamespaceTable::new();
    let mut analyzer = Analyzer::new(&mut table);
    let node = analyzer
        .analyze_top_level(&read_string("(let* [x 1 x \"two\"] x)").unwrap())
        .unwrap();
    let Op::Let { is_loop, bindings, body } = node.op else {
        panic!("expected let");
    };
    assert!(!is_loop);
    let (first, second) = (&bindings[0].local, &bindings[1].local);
    assert_eq!(second.shadow, Some(first.id));
    assert_eq!(first.shadow, None);
    assert_eq!(analyzer.binding(second.id).unwrap().name, Symbol::simple("x"));
    assert_eq!(second.tag.as_deref(), Some("string"));
    assert_eq!(body.tag.as_deref(), Some("string"));
    assert!(analysis_error("(let* [a.b 1] 1)").message().contains("Invalid local name"));
    assert!(analysis_error("(let* [ns/a 1] 1)").message().contains("Invalid local name"));
}

#[test]
fn test_loop_body_in_expression_position_returns() {
    match last("[(loop* [i 0] i)]").op {
        Op::Vector { items } => match &items[0].op {
            Op::Let { is_loop: true, body, .. } => assert_eq!(body.env.context, Context::Return),
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_letfn_bindings_see_each_other() {
    let result = analyze_ok("(letfn* [f (fn* [] (g)) g (fn* [] (f))] (f))");
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert!(matches!(result.nodes[0].op, Op::Letfn { .. }));
}

#[test]
fn test_do_and_quote() {
    match last("(do 1 2 3)").op {
        Op::Do { statements, ret } => {
            assert_eq!(statements.len(), 2);
            assert!(statements.iter().all(|s| s.env.context == Context::Statement));
            assert_eq!(ret.form, Form::int(3));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(last("(do)").op, Op::Do { ref statements, .. } if statements.is_empty()));
    match last("'(a b)").op {
        Op::Constant { value } => assert_eq!(value, read_string("(a b)").unwrap()),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_try_forms() {
    match last("(try* 1 (catch e e) (finally 2))").op {
        Op::Try { catch_local, catch, finally, .. } => {
            assert_eq!(catch_local.unwrap().name, Symbol::simple("e"));
            assert!(catch.is_some());
            assert_eq!(finally.unwrap().env.context, Context::Statement);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(last("(try* 1 2)").op, Op::Do { .. }));
    assert!(analysis_error("(try* 1 (finally 2) (catch e 3))")
        .message()
        .contains("try*"));
}

#[test]
fn test_case_clauses() {
    match last("(let* [x 1] (case* x (1 2) :low 3 :three :other))").op {
        Op::Let { body, .. } => match &body.op {
            Op::Do { ret, .. } => match &ret.op {
                Op::Case { clauses, default, .. } => {
                    assert_eq!(clauses.len(), 2);
                    assert_eq!(clauses[0].tests, vec![Form::int(1), Form::int(2)]);
                    assert!(default.is_some());
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_set_bang_targets() {
    let result = analyze_ok("(set! *unchecked-if* true) (if 1 2 3)");
    assert_eq!(result.ops(), vec!["no-op", "if"]);
    assert!(matches!(result.nodes[1].op, Op::If { unchecked: true, .. }));

    assert!(warning_kinds("(def ^:dynamic *d* 1) (set! *d* 2)").is_empty());
    assert!(analysis_error("(let* [x 1] (set! x 2))").message().contains("Can't set!"));
    assert!(analysis_error("(def plain 1) (set! plain 2)")
        .message()
        .contains("not declared ^:dynamic"));

    match last("(let* [o 1] (set! o -f 2))").op {
        Op::Let { body, .. } => match &body.op {
            Op::Do { ret, .. } => match &ret.op {
                Op::SetBang { target, .. } => assert!(matches!(
                    &target.op,
                    Op::Dot { kind: DotKind::Field(f), .. } if f == "f"
                )),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_mutable_fields_can_be_set() {
    let form = read_string("(fn* [v] (set! x v))")
        .unwrap()
        .merge_meta(vec![(
            Form::keyword(Keyword::qualified("cinder.analyzer", "fields")),
            Form::vector(vec![Form::sym("x").merge_meta(vec![(Form::kw("mutable"), Form::bool(true))])]),
        )]);
    let mut table = NamespaceTable::new();
    let mut analyzer = Analyzer::new(&mut table);
    assert!(analyzer.analyze_top_level(&form).is_ok());
}

#[test]
fn test_dot_forms() {
    match last("(let* [o 1] (. o -x))").op {
        Op::Let { body, .. } => match &body.op {
            Op::Do { ret, .. } => assert!(matches!(
                &ret.op,
                Op::Dot { kind: DotKind::Field(f), args, .. } if f == "x" && args.is_empty()
            )),
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
    match last("(.push js/arr 1 2)").op {
        Op::Dot { kind, args, target } => {
            assert_eq!(kind, DotKind::Method("push".into()));
            assert_eq!(args.len(), 2);
            assert!(matches!(target.op, Op::Var { info: VarRef::Js, .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    match last("(. js/Math (max 1 2))").op {
        Op::Dot { kind, args, .. } => {
            assert_eq!(kind, DotKind::Method("max".into()));
            assert_eq!(args.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(analysis_error("(. js/o -x 1)").message().contains("does not take arguments"));
}

#[test]
fn test_js_templates() {
    match last("(js* \"~{} + ~{}\" 1 2)").op {
        Op::Js { code, args } => {
            assert_eq!(code, JsCode::Segments(vec!["".into(), " + ".into(), "".into()]));
            assert_eq!(args.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(last("(js* \"debugger\")").op, Op::Js { code: JsCode::Raw(_), .. }));
    assert_eq!(warning_kinds("js/a.b"), vec![WarningKind::MalformedJs]);
}

#[test]
fn test_types_and_constructors() {
    let mut compiler = Compiler::new();
    let result = compiler
        .analyze_str("(deftype* Point [x y]) (Point. 1 2) (new Point 1)", None)
        .unwrap();
    assert_eq!(result.ops(), vec!["deftype", "new", "new"]);
    assert_eq!(result.nodes[1].tag.as_deref(), Some("cinder.user/Point"));
    let kinds: Vec<_> = result.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(kinds, vec![WarningKind::ArityMismatch]);
    let def = compiler.table().lookup_def(USER_NS, "Point").unwrap();
    assert!(def.is_type);
    assert_eq!(def.num_fields, Some(2));
}

#[test]
fn test_record_fields_include_synthetic_fields() {
    let mut compiler = Compiler::new();
    let result = compiler.analyze_str("(defrecord* Person [name])", None).unwrap();
    match &result.nodes[0].op {
        Op::Defrecord { fields, .. } => {
            let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["name", "__meta", "__extmap"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    let def = compiler.table().lookup_def(USER_NS, "Person").unwrap();
    assert!(def.record);
    assert_eq!(def.num_fields, Some(3));
}

#[test]
fn test_extend_records_implementers() {
    let mut compiler = Compiler::new();
    let result = compiler
        .analyze_str(
            "(def IShow nil)\n(deftype* Box [v])\n(extend string IShow {:show (fn* [s] s)})\n(extend Box IShow {:show (fn* [b] b)})",
            None,
        )
        .unwrap();
    match &result.nodes[2].op {
        Op::Extend { etype, primitive, impls } => {
            assert_eq!(*etype, Symbol::simple("string"));
            assert!(primitive);
            assert_eq!(impls[0].protocol, Symbol::qualified(USER_NS, "IShow"));
            assert_eq!(impls[0].methods[0].0, "show");
        }
        other => panic!("unexpected {other:?}"),
    }
    let table = compiler.table();
    let implementers = table.implementers_of("cinder.user/show").unwrap();
    assert!(implementers.contains("string"));
    assert!(implementers.contains("cinder.user/Box"));
    let protocol = table.lookup_def(USER_NS, "IShow").unwrap();
    assert!(protocol.protocols.contains("string"));
    assert!(analysis_error("(def P nil) (extend string P {\"m\" 1})")
        .message()
        .contains("must be a keyword"));
}

#[test]
fn test_macros_expand_before_analysis() {
    assert!(matches!(last("(when true 1)").op, Op::If { .. }));
    assert!(matches!(last("(comment ignored)").op, Op::Constant { .. }));
    // a local named like a macro is invoked instead
    match last("(let* [when (fn* [x] x)] (when 1))").op {
        Op::Let { body, .. } => match &body.op {
            Op::Do { ret, .. } => assert!(matches!(ret.op, Op::Invoke { .. })),
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_user_macros_and_expansion_limit() {
    let mut table = NamespaceTable::new();
    let unless: MacroFn = Rc::new(|_: &Form, _: &Env, args: &[Form]| {
        Ok(Form::list(vec![
            Form::sym("if"),
            args[0].clone(),
            Form::nil(),
            args[1].clone(),
        ]))
    });
    table.register_macro(USER_NS, "unless", unless);
    let looping: MacroFn = Rc::new(|form: &Form, _: &Env, _: &[Form]| Ok(form.clone()));
    table.register_macro(USER_NS, "forever", looping);
    let options = AnalyzerOptions {
        max_macroexpand_depth: 8,
        ..AnalyzerOptions::default()
    };
    let mut analyzer = Analyzer::new(&mut table).with_options(options);
    let node = analyzer
        .analyze_top_level(&read_string("(unless false 1)").unwrap())
        .unwrap();
    assert!(matches!(node.op, Op::If { .. }));
    let err = analyzer
        .analyze_top_level(&read_string("(forever)").unwrap())
        .unwrap_err();
    assert!(err.message().contains("8 steps"));
}

#[test]
fn test_auto_resolved_keywords_follow_namespace() {
    let mut table = NamespaceTable::new();
    let mut analyzer = Analyzer::new(&mut table);
    let node = analyzer.analyze_top_level(&read_string("::k").unwrap()).unwrap();
    match node.op {
        Op::Constant { value } => {
            assert_eq!(value, Form::keyword(Keyword::qualified(USER_NS, "k")))
        }
        other => panic!("unexpected {other:?}"),
    }
    let result = analyze_ok("(ns app.main) ::k");
    match &result.nodes[1].op {
        Op::Constant { value } => {
            assert_eq!(*value, Form::keyword(Keyword::qualified("app.main", "k")))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_def_metadata_is_recorded() {
    let mut compiler = Compiler::new();
    compiler
        .analyze_str("(def ^:export e 1) (def ^{:export \"custom\" :tag number} t 2)", None)
        .unwrap();
    let table = compiler.table();
    assert_eq!(
        table.lookup_def(USER_NS, "e").unwrap().export.as_deref(),
        Some("cinder.user.e")
    );
    let t = table.lookup_def(USER_NS, "t").unwrap();
    assert_eq!(t.export.as_deref(), Some("custom"));
    assert_eq!(t.tag.as_deref(), Some("number"));
}

#[test]
fn test_invalid_use_of_ampersand() {
    assert!(analysis_error("(& 1)").message().contains("Invalid use of &"));
}

#[test]
fn test_core_namespace_defs_do_not_warn_redefinition() {
    let mut table = NamespaceTable::new();
    let mut analyzer = Analyzer::new(&mut table);
    analyzer.set_current_ns(CORE_NS);
    analyzer
        .analyze_top_level(&read_string("(def seq (fn* [x] x))").unwrap())
        .unwrap();
    assert!(analyzer.warnings().is_empty());
}
