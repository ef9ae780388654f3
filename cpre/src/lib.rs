#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # C/C++ Preprocessor Library
//!
//! A standards-conforming C/C++ preprocessor: source text containing
//! directives (`#define`, `#include`, `#if`, `#pragma`, ...) is transformed
//! into expanded output text, honoring the macro-expansion and
//! translation-limit semantics of C90, C99 and C++ as well as the K&R and
//! pre-Standard dialects.
//!
//! ## Features
//!
//! - Object-like, function-like and variadic macro expansion, with `#`
//!   stringizing, `##` pasting, and recursive-expansion suppression
//! - Conditional compilation (`#if`, `#ifdef`, `#ifndef`, `#elif`, `#else`,
//!   `#endif`) with full constant-expression evaluation
//! - Include processing against search directories or a custom resolver,
//!   `#include_next`, and `#pragma once` keyed on normalized paths
//! - `#pragma push_macro`/`pop_macro` scoped redefinition
//! - Dialect-selectable translation limits, trigraphs and digraphs
//! - Structured diagnostics with warning classes, and `#line`
//!   re-synchronization markers
//!
//! ## Example
//!
//! ```rust,no_run
//! use cpre::{preprocess, Dialect, PreprocessorConfig};
//!
//! let code = r#"
//! #define GREETING "hello"
//! #if defined GREETING
//! const char* s = GREETING;
//! #endif
//! "#;
//!
//! let config = PreprocessorConfig::for_dialect(Dialect::C99);
//! let result = preprocess(code, &config).unwrap();
//! println!("{}", result);
//! ```

mod config;
mod diag;
mod driver;
mod error;
mod expand;
mod expr;
mod include;
mod macro_def;
mod macro_table;
mod scanner;
mod session;
mod token;

pub use config::{
    Dialect, DiagnosticHandler, IncludeContext, IncludeKind, IncludeResolver, Limits,
    PreprocessorConfig, SearchRule,
};
pub use diag::{Diagnostic, Severity, warn_class};
pub use driver::Preprocessor;
pub use error::PreprocessError;

use std::path::Path;

/// Preprocess source text with the given configuration.
///
/// Recoverable problems are reported through the configuration's diagnostic
/// handler; use [`Preprocessor`] directly to inspect collected diagnostics
/// and dependency records.
///
/// # Errors
/// Returns `PreprocessError` on fatal conditions: include or conditional
/// nesting beyond the hard cap, rescanning beyond the recursion limit, or
/// I/O failure.
pub fn preprocess<S: AsRef<str>>(
    input: S,
    config: &PreprocessorConfig,
) -> Result<String, PreprocessError> {
    let mut preprocessor = Preprocessor::with_config(config.clone());
    preprocessor.process(input.as_ref())
}

/// Preprocess a file and write the result to another file.
///
/// # Errors
/// Returns `PreprocessError` if the input cannot be read, the output cannot
/// be written, or preprocessing hits a fatal condition.
pub fn preprocess_file<P: AsRef<Path>>(
    input_path: P,
    output_path: P,
    config: &PreprocessorConfig,
) -> Result<(), PreprocessError> {
    let output = preprocess_file_to_string(input_path, config)?;
    std::fs::write(output_path, output)?;
    Ok(())
}

/// Preprocess a file and return the result as a string.
///
/// # Errors
/// Returns `PreprocessError` if the file cannot be read or preprocessing
/// hits a fatal condition.
pub fn preprocess_file_to_string<P: AsRef<Path>>(
    input_path: P,
    config: &PreprocessorConfig,
) -> Result<String, PreprocessError> {
    let mut preprocessor = Preprocessor::with_config(config.clone());
    preprocessor.process_file(input_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> String {
        let mut pp = Preprocessor::new();
        pp.process(input).unwrap()
    }

    #[test]
    fn macro_free_input_is_identity() {
        let src = "int main(void) {\n    return 0;\n}\n";
        assert_eq!(run(src), "int main(void) {\n    return 0;\n}");
    }

    #[test]
    fn simple_object_macro() {
        let out = run("#define PI 3.14\nfloat x = PI;\n");
        assert!(out.contains("float x = 3.14;"));
    }

    #[test]
    fn function_like_macro() {
        let out = run("#define ADD(a, b) ((a)+(b))\nint z = ADD(1, 2);\n");
        assert!(out.contains("((1)+(2))"));
    }

    #[test]
    fn self_referential_macro_terminates_with_one_occurrence() {
        let out = run("#define M M + 1\nint x = M;\n");
        assert_eq!(out.matches('M').count(), 1);
        assert!(out.contains("int x = M + 1;"));
    }

    #[test]
    fn macro_cycle_terminates() {
        let out = run("#define A B\n#define B C\n#define C A\nA\n");
        assert_eq!(out.trim(), "A");
    }

    #[test]
    fn argument_count_mismatch_preserves_invocation() {
        let mut pp = Preprocessor::new();
        let out = pp.process("#define PAIR(a, b) a b\nPAIR(1)\n").unwrap();
        assert!(out.contains("PAIR"));
        assert!(out.contains("(1)"));
        assert_eq!(pp.error_count(), 1);
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.severity == Severity::Error && d.message.contains("argument"))
        );
    }

    #[test]
    fn stringize_collapses_whitespace_and_escapes() {
        let out = run("#define S(x) #x\nconst char* s = S(a  \"b\\\"c\" d);\n");
        assert!(out.contains(r#""a \"b\\\"c\" d""#));
    }

    #[test]
    fn paste_forms_identifier() {
        let out = run("#define CAT(a, b) a##b\nint CAT(foo, bar) = 1;\n");
        assert!(out.contains("int foobar = 1;"));
    }

    #[test]
    fn invalid_paste_is_an_error() {
        let mut pp = Preprocessor::new();
        pp.process("#define CAT(a, b) a##b\nCAT(1, +)\n").unwrap();
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.severity == Severity::Error && d.message.contains("valid token"))
        );
    }

    #[test]
    fn elif_branch_is_selected() {
        let out = run("#if 0\na\n#elif 1\nb\n#else\nc\n#endif\n");
        assert!(!out.contains('a'));
        assert!(out.contains('b'));
        assert!(!out.contains('c'));
    }

    #[test]
    fn elif_selection_holds_at_depth() {
        // Nest the same group shape inside its own #elif branch.
        let depth = 10;
        let mut src = String::new();
        for level in 0..depth {
            src.push_str(&format!("#if 0\nwrong_if_{level}\n#elif 1\ntaken_{level}\n"));
        }
        for _ in 0..depth {
            src.push_str("#else\nwrong_else\n#endif\n");
        }
        let out = run(&src);
        for level in 0..depth {
            assert!(out.contains(&format!("taken_{level}")));
        }
        assert!(!out.contains("wrong_if"));
        assert!(!out.contains("wrong_else"));
    }

    #[test]
    fn conditional_nesting_beyond_hard_cap_is_fatal() {
        let mut src = String::new();
        for _ in 0..300 {
            src.push_str("#if 1\n");
        }
        let mut pp = Preprocessor::new();
        assert!(matches!(
            pp.process(&src),
            Err(PreprocessError::ConditionalNestingTooDeep(_))
        ));
    }

    #[test]
    fn conditional_nesting_beyond_dialect_minimum_warns() {
        let config = PreprocessorConfig::for_dialect(Dialect::C90)
            .with_warn_level(warn_class::PORTABILITY);
        let mut pp = Preprocessor::with_config(config);
        let mut src = String::new();
        for _ in 0..10 {
            src.push_str("#if 1\n");
        }
        for _ in 0..10 {
            src.push_str("#endif\n");
        }
        pp.process(&src).unwrap();
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.message.contains("nested conditional"))
        );
    }

    #[test]
    fn ifdef_and_ifndef() {
        let out = run("#define DEBUG 1\n#ifdef DEBUG\nint x = 1;\n#else\nint x = 0;\n#endif\n#ifndef DEBUG\nint y = 0;\n#endif\n");
        assert!(out.contains("int x = 1;"));
        assert!(!out.contains("int x = 0;"));
        assert!(!out.contains("int y = 0;"));
    }

    #[test]
    fn undef_removes_definition() {
        let out = run("#define FOO 1\n#undef FOO\nint x = FOO;\n");
        assert!(out.contains("int x = FOO;"));
    }

    #[test]
    fn skipped_region_defines_nothing() {
        let out = run("#if 0\n#define HIDDEN 1\n#endif\n#ifdef HIDDEN\nvisible\n#endif\n");
        assert!(!out.contains("visible"));
    }

    #[test]
    fn variadic_macro() {
        let out = run("#define LOG(fmt, ...) printf(fmt, __VA_ARGS__)\nLOG(\"%s\", \"world\");\n");
        assert!(out.contains("printf(\"%s\", \"world\")"));
    }

    #[test]
    fn variadic_macro_is_an_error_in_knr() {
        let config = PreprocessorConfig::for_dialect(Dialect::KAndR);
        let mut pp = Preprocessor::with_config(config);
        pp.process("#define LOG(fmt, ...) x\n").unwrap();
        assert_eq!(pp.error_count(), 1);
    }

    #[test]
    fn nested_macro_calls() {
        let out = run("#define ADD(a, b) ((a)+(b))\n#define MUL(a, b) ((a)*(b))\nint x = ADD(ADD(1, 2), MUL(3, 4));\n");
        assert!(out.contains("((((1)+(2)))+(((3)*(4))))"));
    }

    #[test]
    fn magic_line_and_file_macros() {
        let mut pp = Preprocessor::new();
        pp.set_current_file("test.c");
        let out = pp
            .process("int line = __LINE__;\nconst char* f = __FILE__;\n")
            .unwrap();
        assert!(out.contains("int line = 1;"));
        assert!(out.contains("const char* f = \"test.c\";"));
    }

    #[test]
    fn magic_date_and_time_shapes() {
        let out = run("__DATE__ __TIME__\n");
        // "Mmm dd yyyy" and "hh:mm:ss"
        let parts: Vec<&str> = out.trim().split("\" \"").collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len() - 1, 11);
        assert_eq!(parts[1].len() - 1, 8);
    }

    #[test]
    fn include_via_resolver() {
        let config = PreprocessorConfig::default().with_include_resolver(|name, _, _| {
            (name == "inc.h").then(|| "#define FOO 42\n".to_string())
        });
        let out = preprocess("#include \"inc.h\"\nint x = FOO;\n", &config).unwrap();
        assert!(out.contains("int x = 42;"));
    }

    #[test]
    fn computed_include_is_macro_expanded() {
        let config = PreprocessorConfig::default().with_include_resolver(|name, _, _| {
            (name == "h1.h").then(|| "int one;\n".to_string())
        });
        let out = preprocess("#define HDR \"h1.h\"\n#include HDR\n", &config).unwrap();
        assert!(out.contains("int one;"));
    }

    #[test]
    fn missing_include_is_recoverable() {
        let config = PreprocessorConfig::default().with_include_resolver(|_, _, _| None);
        let mut pp = Preprocessor::with_config(config);
        let out = pp.process("#include \"gone.h\"\nint after;\n").unwrap();
        assert!(out.contains("int after;"));
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.severity == Severity::Error && d.message.contains("not found"))
        );
    }

    #[test]
    fn pragma_once_by_two_path_spellings() {
        let config = PreprocessorConfig::default().with_include_resolver(|name, _, _| {
            name.ends_with("guarded.h")
                .then(|| "#pragma once\nint marker;\n".to_string())
        });
        let out = preprocess(
            "#include \"guarded.h\"\n#include \"sub/../guarded.h\"\n",
            &config,
        )
        .unwrap();
        assert_eq!(out.matches("int marker;").count(), 1);
    }

    #[test]
    fn pragma_operator_from_macro_expansion() {
        let config = PreprocessorConfig::default().with_include_resolver(|name, _, _| {
            (name == "g.h").then(|| "#define MARK_ONCE _Pragma(\"once\")\nMARK_ONCE\nint body;\n".to_string())
        });
        let out = preprocess("#include \"g.h\"\n#include \"g.h\"\n", &config).unwrap();
        assert_eq!(out.matches("int body;").count(), 1);
    }

    #[test]
    fn push_and_pop_restore_object_macro() {
        let out = run(concat!(
            "#define X fn(1)\n",
            "X\n",
            "#pragma push_macro(\"X\")\n",
            "#undef X\n",
            "#define X other\n",
            "X\n",
            "#pragma pop_macro(\"X\")\n",
            "X\n",
        ));
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["fn(1)", "other", "fn(1)"]);
    }

    #[test]
    fn push_and_pop_restore_function_macro() {
        let out = run(concat!(
            "#define F(a) ((a) + 1)\n",
            "#pragma push_macro(\"F\")\n",
            "#define F(a) ((a) - 1)\n",
            "F(2)\n",
            "#pragma pop_macro(\"F\")\n",
            "F(2)\n",
        ));
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["((2) - 1)", "((2) + 1)"]);
    }

    #[test]
    fn popped_definition_expands_again() {
        // A pushed definition is independent of the loop guard: after the
        // pop it must expand exactly like the original did.
        let out = run(concat!(
            "#define R R1\n",
            "R\n",
            "#pragma push_macro(\"R\")\n",
            "#define R R2\n",
            "#pragma pop_macro(\"R\")\n",
            "R\n",
        ));
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["R1", "R1"]);
    }

    #[test]
    fn pop_without_push_warns() {
        let mut pp = Preprocessor::new();
        pp.process("#define X 1\n#pragma pop_macro(\"X\")\n").unwrap();
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.message.contains("has not been pushed"))
        );
    }

    #[test]
    fn unterminated_conditional_is_an_error() {
        let mut pp = Preprocessor::new();
        pp.process("#if 1\nint x;\n").unwrap();
        assert!(
            pp.diagnostics()
                .iter()
                .any(|d| d.message.contains("unterminated #if"))
        );
    }

    #[test]
    fn error_directive_reports() {
        let mut pp = Preprocessor::new();
        pp.process("#if 0\n#error hidden\n#endif\n#error visible\n")
            .unwrap();
        let errors: Vec<_> = pp
            .diagnostics()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("visible"));
    }

    #[test]
    fn comments_become_one_space() {
        let out = run("int x/* gap */= 1; // tail\n");
        assert!(out.contains("int x = 1; "));
    }

    #[test]
    fn comments_kept_on_request() {
        let config = PreprocessorConfig::default().with_keep_comments(true);
        let out = preprocess("int x = 1; // tail\n", &config).unwrap();
        assert!(out.contains("// tail"));
    }

    #[test]
    fn trigraphs_in_c90() {
        let config = PreprocessorConfig::for_dialect(Dialect::C90);
        let out = preprocess("??=define X 1\nint a??(X??);\n", &config).unwrap();
        assert!(out.contains("int a[1];"));
    }

    #[test]
    fn digraphs_in_c99() {
        let out = run("%:define Y 2\nint b<:Y:>;\n");
        assert!(out.contains("int b[2];"));
    }

    #[test]
    fn line_splice_joins_directive() {
        let out = run("#define LONG\\\n 5\nLONG\n");
        assert!(out.contains('5'));
    }

    #[test]
    fn predefined_dialect_macros() {
        let c99 = preprocess("#if __STDC_VERSION__ == 199901L\nc99\n#endif\n",
            &PreprocessorConfig::for_dialect(Dialect::C99)).unwrap();
        assert!(c99.contains("c99"));
        let cxx = preprocess("#ifdef __cplusplus\ncxx\n#endif\n",
            &PreprocessorConfig::for_dialect(Dialect::Cplusplus)).unwrap();
        assert!(cxx.contains("cxx"));
    }

    #[test]
    fn configured_defines_and_undefines() {
        let config = PreprocessorConfig::default()
            .with_define("FROM_CONFIG", "9")
            .with_undefine("__STDC_HOSTED__");
        let out = preprocess(
            "int v = FROM_CONFIG;\n#ifndef __STDC_HOSTED__\nfreestanding\n#endif\n",
            &config,
        )
        .unwrap();
        assert!(out.contains("int v = 9;"));
        assert!(out.contains("freestanding"));
    }

    #[test]
    fn diagnostic_handler_sees_events() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let config = PreprocessorConfig::default()
            .with_diagnostic_handler(move |d| sink.borrow_mut().push(d.message.clone()));
        let mut pp = Preprocessor::with_config(config);
        pp.process("#undef NEVER_DEFINED\n").unwrap();
        assert!(seen.borrow().iter().any(|m| m.contains("NEVER_DEFINED")));
    }

    #[test]
    fn reset_supports_repeated_runs() {
        let mut pp = Preprocessor::new();
        pp.process("#define ONCE 1\n#if 1\nint x;\n").unwrap();
        assert!(!pp.diagnostics().is_empty());
        pp.reset();
        assert!(pp.diagnostics().is_empty());
        let out = pp.process("#ifdef ONCE\nstale\n#endif\nfresh\n").unwrap();
        assert!(!out.contains("stale"));
        assert!(out.contains("fresh"));
    }

    mod filesystem {
        use super::*;
        use std::fs;
        use std::path::PathBuf;

        fn scratch_dir(tag: &str) -> PathBuf {
            let dir =
                std::env::temp_dir().join(format!("cpre-lib-{}-{}", tag, std::process::id()));
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).unwrap();
            dir
        }

        #[test]
        fn include_next_layers_headers() {
            let root = scratch_dir("next");
            let first = root.join("first");
            let second = root.join("second");
            fs::create_dir_all(&first).unwrap();
            fs::create_dir_all(&second).unwrap();
            fs::write(
                first.join("layer.h"),
                "#include_next <layer.h>\nint from_first;\n",
            )
            .unwrap();
            fs::write(second.join("layer.h"), "int from_second;\n").unwrap();

            let config = PreprocessorConfig::default()
                .with_include_dir(&first)
                .with_include_dir(&second);
            let mut pp = Preprocessor::with_config(config);
            let out = pp.process("#include <layer.h>\n").unwrap();
            let second_pos = out.find("int from_second;").unwrap();
            let first_pos = out.find("int from_first;").unwrap();
            assert!(second_pos < first_pos);
            assert_eq!(pp.dependencies().len(), 2);
            let _ = fs::remove_dir_all(&root);
        }

        #[test]
        fn pragma_once_through_relative_spellings_on_disk() {
            let root = scratch_dir("once");
            let sub = root.join("sub");
            fs::create_dir_all(&sub).unwrap();
            fs::write(root.join("guard.h"), "#pragma once\nint marker;\n").unwrap();
            let src = format!(
                "#include \"{0}/guard.h\"\n#include \"{0}/sub/../guard.h\"\n",
                root.display()
            );

            let out = preprocess(&src, &PreprocessorConfig::default()).unwrap();
            assert_eq!(out.matches("int marker;").count(), 1);
            let _ = fs::remove_dir_all(&root);
        }

        #[test]
        fn file_helpers_round_trip() {
            let root = scratch_dir("helpers");
            let input = root.join("in.c");
            let output = root.join("out.i");
            fs::write(&input, "#define V 3\nint v = V;\n").unwrap();

            let config = PreprocessorConfig::default();
            preprocess_file(&input, &output, &config).unwrap();
            let written = fs::read_to_string(&output).unwrap();
            assert!(written.contains("int v = 3;"));

            let direct = preprocess_file_to_string(&input, &config).unwrap();
            assert!(direct.contains("int v = 3;"));
            let _ = fs::remove_dir_all(&root);
        }

        #[test]
        fn line_markers_across_include() {
            let root = scratch_dir("markers");
            fs::write(root.join("h.h"), "int inner;\n").unwrap();
            let src = format!("int a;\n#include \"{}/h.h\"\nint b;\n", root.display());

            let config = PreprocessorConfig::default().with_line_markers(true);
            let mut pp = Preprocessor::with_config(config);
            pp.set_current_file("main.c");
            let out = pp.process(&src).unwrap();
            assert!(out.contains("#line 1 "));
            assert!(out.contains("h.h"));
            assert!(out.contains("#line 3 \"main.c\""));
            let _ = fs::remove_dir_all(&root);
        }
    }
}
