#[cfg(test)]
mod interpreter_tests {
    use rlox::error::LoxError;
    use rlox::interpreter::Interpreter;
    use rlox::parser::Parser;
    use rlox::resolver::Resolver;
    use rlox::scanner::Scanner;

    /// Parse, resolve and run a program, capturing everything `print`
    /// writes.  Output produced before a runtime error is kept.
    fn run_capture(source: &str) -> (String, Result<(), LoxError>) {
        let mut parser = Parser::new(Scanner::new(source.as_bytes().to_vec()));

        let statements = parser.parse_program().expect("test program should parse");

        Resolver::new()
            .resolve(&statements)
            .expect("test program should resolve");

        let mut output: Vec<u8> = Vec::new();

        let result = {
            let mut interpreter = Interpreter::with_output(&mut output);

            interpreter.run(&statements)
        };

        (String::from_utf8(output).expect("utf-8 output"), result)
    }

    fn run_program(source: &str) -> String {
        let (output, result) = run_capture(source);

        if let Err(e) = result {
            panic!("program failed: {}\noutput so far: {}", e, output);
        }

        output
    }

    fn run_expect_runtime_error(source: &str) -> (String, LoxError) {
        let (output, result) = run_capture(source);

        match result {
            Ok(()) => panic!("expected runtime error for {:?}", source),

            Err(e) => {
                assert_eq!(e.exit_code(), 70, "unexpected category: {}", e);

                (output, e)
            }
        }
    }

    /// Evaluate a single expression without the resolver pass, the way
    /// the `evaluate` command does.
    fn eval_expression(source: &str) -> Result<String, LoxError> {
        let mut parser = Parser::new(Scanner::new(source.as_bytes().to_vec()));

        let expr = parser.parse_expression()?;

        let mut interpreter = Interpreter::with_output(Vec::new());

        interpreter.evaluate(&expr).map(|v| v.to_string())
    }

    fn assert_evaluates_to(source: &str, expected: &str) {
        match eval_expression(source) {
            Ok(value) => assert_eq!(value, expected, "source: {}", source),
            Err(e) => panic!("evaluation failed for {:?}: {}", source, e),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Expression evaluation
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_eval_01_arithmetic() {
        assert_evaluates_to("1 + 2 * 3", "7");
        assert_evaluates_to("(1 + 2) * 3", "9");
        assert_evaluates_to("10 - 4 / 2", "8");
        assert_evaluates_to("-3 + 1", "-2");
    }

    #[test]
    fn test_eval_02_number_formatting() {
        assert_evaluates_to("1", "1");
        assert_evaluates_to("1.5", "1.5");
        assert_evaluates_to("2.0", "2");
        assert_evaluates_to("0.1 + 0.2", "0.30000000000000004");
    }

    #[test]
    fn test_eval_03_string_concatenation() {
        assert_evaluates_to("\"foo\" + \"bar\"", "foobar");
        assert_evaluates_to("\"\" + \"\"", "");
    }

    #[test]
    fn test_eval_04_comparisons() {
        assert_evaluates_to("1 < 2", "true");
        assert_evaluates_to("2 <= 2", "true");
        assert_evaluates_to("3 > 4", "false");
        assert_evaluates_to("4 >= 5", "false");
    }

    #[test]
    fn test_eval_05_equality() {
        assert_evaluates_to("1 == 1", "true");
        assert_evaluates_to("1 == \"1\"", "false");
        assert_evaluates_to("nil == nil", "true");
        assert_evaluates_to("nil == false", "false");
        assert_evaluates_to("\"a\" != \"b\"", "true");
    }

    #[test]
    fn test_eval_06_truthiness_of_bang() {
        // Canonical rule: only false and nil are falsy.
        assert_evaluates_to("!nil", "true");
        assert_evaluates_to("!false", "true");
        assert_evaluates_to("!0", "false");
        assert_evaluates_to("!\"\"", "false");
        assert_evaluates_to("!!true", "true");
    }

    #[test]
    fn test_eval_07_division_by_zero_is_ieee() {
        assert_evaluates_to("1 / 0 > 1000000", "true");
        assert_evaluates_to("-1 / 0 < 0", "true");
    }

    #[test]
    fn test_eval_08_runtime_errors() {
        assert!(eval_expression("-\"muffin\"").is_err());
        assert!(eval_expression("1 + \"one\"").is_err());
        assert!(eval_expression("\"a\" < \"b\"").is_err());
        assert!(eval_expression("missing").is_err());
    }

    // ─────────────────────────────────────────────────────────────────
    // Statements, scoping, control flow
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_run_01_print_arithmetic() {
        assert_eq!(run_program("print 1 + 2 * 3;"), "7\n");
    }

    #[test]
    fn test_run_02_block_shadowing() {
        let output = run_program(
            "var a = \"hi\";\n\
             {\n\
                 var a = a + \"!\";\n\
                 print a;\n\
             }\n\
             print a;\n",
        );

        assert_eq!(output, "hi!\nhi\n");
    }

    #[test]
    fn test_run_03_assignment_is_an_expression() {
        let output = run_program("var a = 1; var b = 2; a = b = 42; print a; print b;");

        assert_eq!(output, "42\n42\n");
    }

    #[test]
    fn test_run_04_if_else() {
        let output = run_program(
            "if (1 < 2) print \"then\"; else print \"else\";\n\
             if (nil) print \"bad\"; else print \"good\";\n",
        );

        assert_eq!(output, "then\ngood\n");
    }

    #[test]
    fn test_run_05_while_loop() {
        let output = run_program(
            "var i = 0;\n\
             while (i < 3) {\n\
                 print i;\n\
                 i = i + 1;\n\
             }\n",
        );

        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn test_run_06_for_loop() {
        let output = run_program("for (var i = 0; i < 3; i = i + 1) print i;");

        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn test_run_07_for_header_shadows_global() {
        let output = run_program(
            "var i = 99;\n\
             for (var i = 0; i < 2; i = i + 1) print i;\n\
             print i;\n",
        );

        assert_eq!(output, "0\n1\n99\n");
    }

    #[test]
    fn test_run_08_short_circuit_skips_side_effects() {
        let output = run_program(
            "var hits = 0;\n\
             fun bump() { hits = hits + 1; return true; }\n\
             false and bump();\n\
             true or bump();\n\
             print hits;\n\
             true and bump();\n\
             false or bump();\n\
             print hits;\n",
        );

        assert_eq!(output, "0\n2\n");
    }

    #[test]
    fn test_run_09_logicals_return_operand() {
        let output = run_program(
            "print 1 or 2;\n\
             print nil or \"fallback\";\n\
             print nil and 3;\n\
             print \"lhs\" and \"rhs\";\n",
        );

        assert_eq!(output, "1\nfallback\nnil\nrhs\n");
    }

    #[test]
    fn test_run_10_global_var_rebinding() {
        let output = run_program("var a = 1; var a = a + 1; print a;");

        assert_eq!(output, "2\n");
    }

    // ─────────────────────────────────────────────────────────────────
    // Functions, closures, return
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_fun_01_counter_closure() {
        let output = run_program(
            "fun makeCounter() {\n\
                 var i = 0;\n\
                 fun count() {\n\
                     i = i + 1;\n\
                     print i;\n\
                 }\n\
                 return count;\n\
             }\n\
             var counter = makeCounter();\n\
             counter();\n\
             counter();\n",
        );

        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_fun_02_recursive_fibonacci() {
        let output = run_program(
            "fun fib(n) {\n\
                 if (n < 2) return n;\n\
                 return fib(n - 1) + fib(n - 2);\n\
             }\n\
             print fib(10);\n",
        );

        assert_eq!(output, "55\n");
    }

    #[test]
    fn test_fun_03_closure_sees_definition_env() {
        let output = run_program(
            "var x = \"global\";\n\
             fun outer() {\n\
                 var x = \"outer\";\n\
                 fun inner() { print x; }\n\
                 return inner;\n\
             }\n\
             var f = outer();\n\
             f();\n",
        );

        assert_eq!(output, "outer\n");
    }

    #[test]
    fn test_fun_04_capture_is_live_not_a_snapshot() {
        let output = run_program(
            "fun make() {\n\
                 var i = 0;\n\
                 fun get() { return i; }\n\
                 i = 5;\n\
                 return get;\n\
             }\n\
             print make()();\n",
        );

        assert_eq!(output, "5\n");
    }

    #[test]
    fn test_fun_05_return_unwinds_nested_blocks_and_loops() {
        let output = run_program(
            "fun f() {\n\
                 while (true) {\n\
                     {\n\
                         return 7;\n\
                     }\n\
                 }\n\
                 return 8;\n\
             }\n\
             print f();\n",
        );

        assert_eq!(output, "7\n");
    }

    #[test]
    fn test_fun_11_closure_over_loop_variable_outlives_loop() {
        let output = run_program(
            "var get = nil;\n\
             for (var i = 0; i < 3; i = i + 1) {\n\
                 fun snapshot() { return i; }\n\
                 get = snapshot;\n\
             }\n\
             print get();\n",
        );

        // The closure shares the live header frame, so it observes the
        // final value of `i`, not the value at capture time.
        assert_eq!(output, "3\n");
    }

    #[test]
    fn test_fun_06_fall_through_returns_nil() {
        let output = run_program("fun quiet() {} print quiet();");

        assert_eq!(output, "nil\n");
    }

    #[test]
    fn test_fun_07_display_forms() {
        let output = run_program("fun f() {} print f; print clock;");

        assert_eq!(output, "<fn f>\n<builtin-function clock>\n");
    }

    #[test]
    fn test_fun_08_arity_mismatch() {
        let (_, e) = run_expect_runtime_error("fun f(a, b) {} f(1);");

        assert!(e.to_string().contains("Expected 2 arguments but got 1."));
    }

    #[test]
    fn test_fun_09_clock_returns_number() {
        let output = run_program("print clock() > 0;");

        assert_eq!(output, "true\n");
    }

    #[test]
    fn test_fun_10_arguments_evaluate_left_to_right() {
        let output = run_program(
            "fun tag(label) { print label; return label; }\n\
             fun pair(a, b) {}\n\
             pair(tag(\"first\"), tag(\"second\"));\n",
        );

        assert_eq!(output, "first\nsecond\n");
    }

    // ─────────────────────────────────────────────────────────────────
    // Classes, instances, inheritance
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_class_01_method_call() {
        let output = run_program("class Foo { bar() { print \"ok\"; } } Foo().bar();");

        assert_eq!(output, "ok\n");
    }

    #[test]
    fn test_class_02_inherited_method() {
        let output = run_program(
            "class A { hi() { print \"A\"; } }\n\
             class B < A {}\n\
             B().hi();\n",
        );

        assert_eq!(output, "A\n");
    }

    #[test]
    fn test_class_03_constructor_binds_this() {
        let output = run_program(
            "class Person {\n\
                 init(name) { this.name = name; }\n\
                 greet() { print \"hi \" + this.name; }\n\
             }\n\
             Person(\"Ada\").greet();\n",
        );

        assert_eq!(output, "hi Ada\n");
    }

    #[test]
    fn test_class_04_bound_method_keeps_this() {
        let output = run_program(
            "class Person {\n\
                 init(name) { this.name = name; }\n\
                 greet() { print this.name; }\n\
             }\n\
             var a = Person(\"Ada\");\n\
             var b = Person(\"Bob\");\n\
             var greetA = a.greet;\n\
             var greetB = b.greet;\n\
             greetB();\n\
             greetA();\n",
        );

        assert_eq!(output, "Bob\nAda\n");
    }

    #[test]
    fn test_class_05_properties_shadow_methods() {
        let output = run_program(
            "class C { m() { return \"method\"; } }\n\
             var c = C();\n\
             print c.m();\n\
             c.m = \"property\";\n\
             print c.m;\n",
        );

        assert_eq!(output, "method\nproperty\n");
    }

    #[test]
    fn test_class_06_constructor_returns_instance() {
        let output = run_program(
            "class C {\n\
                 init() { this.x = 1; return; }\n\
             }\n\
             var c = C();\n\
             print c.x;\n\
             print c.init();\n",
        );

        assert_eq!(output, "1\nC instance\n");
    }

    #[test]
    fn test_class_07_super_dispatch() {
        let output = run_program(
            "class A { m() { return \"A\"; } }\n\
             class B < A { m() { return \"B(\" + super.m() + \")\"; } }\n\
             print B().m();\n",
        );

        assert_eq!(output, "B(A)\n");
    }

    #[test]
    fn test_class_08_super_binds_current_this() {
        let output = run_program(
            "class A {\n\
                 who() { return this.name; }\n\
                 describe() { return \"A:\" + this.who(); }\n\
             }\n\
             class B < A {\n\
                 init(name) { this.name = name; }\n\
                 describe() { return \"B->\" + super.describe(); }\n\
             }\n\
             print B(\"x\").describe();\n",
        );

        assert_eq!(output, "B->A:x\n");
    }

    #[test]
    fn test_class_09_display_forms() {
        let output = run_program("class Robot {} print Robot; print Robot();");

        assert_eq!(output, "Robot\nRobot instance\n");
    }

    #[test]
    fn test_class_10_equality_semantics() {
        let output = run_program(
            "class A {}\n\
             class B {}\n\
             print A == A;\n\
             print A() == A();\n\
             print A() == B();\n\
             fun f() {}\n\
             print f == f;\n",
        );

        // Classes and instances compare by class name; lambdas are
        // never equal, themselves included.
        assert_eq!(output, "true\ntrue\nfalse\nfalse\n");
    }

    #[test]
    fn test_class_11_chained_paths_and_calls() {
        let output = run_program(
            "class Inner { speak() { print \"inner\"; } }\n\
             class Outer { init() { this.inner = Inner(); } }\n\
             var o = Outer();\n\
             o.inner.speak();\n\
             print o.inner == Inner();\n",
        );

        assert_eq!(output, "inner\ntrue\n");
    }

    #[test]
    fn test_class_12_nested_property_assignment() {
        let output = run_program(
            "class Box {}\n\
             var outer = Box();\n\
             outer.inner = Box();\n\
             outer.inner.value = 42;\n\
             print outer.inner.value;\n",
        );

        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_class_13_method_returning_callable() {
        let output = run_program(
            "class Factory {\n\
                 maker() {\n\
                     fun made() { print \"made\"; }\n\
                     return made;\n\
                 }\n\
             }\n\
             Factory().maker()();\n",
        );

        assert_eq!(output, "made\n");
    }

    #[test]
    fn test_class_14_default_constructor_rejects_args() {
        let (_, e) = run_expect_runtime_error("class C {} C(1);");

        assert!(e.to_string().contains("Expected 0 arguments but got 1."));
    }

    #[test]
    fn test_class_15_unknown_superclass_fails_at_definition() {
        let (_, e) = run_expect_runtime_error("class B < Missing {}");

        assert!(e.to_string().contains("Undefined variable 'Missing'."));
    }

    #[test]
    fn test_class_16_superclass_must_be_class() {
        let (_, e) = run_expect_runtime_error("var NotAClass = 1; class B < NotAClass {}");

        assert!(e.to_string().contains("Superclass must be a class."));
    }

    // ─────────────────────────────────────────────────────────────────
    // Runtime failure surfaces
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_error_01_undefined_variable() {
        let (_, e) = run_expect_runtime_error("print ghost;");

        assert_eq!(e.to_string(), "[line 1] Error: Undefined variable 'ghost'.");
    }

    #[test]
    fn test_error_02_assignment_to_undefined() {
        let (_, e) = run_expect_runtime_error("ghost = 1;");

        assert!(e.to_string().contains("Undefined variable 'ghost'."));
    }

    #[test]
    fn test_error_03_calling_non_callable() {
        let (_, e) = run_expect_runtime_error("var x = 1; x();");

        assert!(e.to_string().contains("Can only call functions and classes."));
    }

    #[test]
    fn test_error_04_property_on_non_instance() {
        let (_, e) = run_expect_runtime_error("var x = 1; print x.field;");

        assert!(e.to_string().contains("Only instances have properties."));
    }

    #[test]
    fn test_error_05_missing_property() {
        let (_, e) = run_expect_runtime_error("class C {} print C().missing;");

        assert!(e.to_string().contains("Undefined property 'missing'."));
    }

    #[test]
    fn test_error_06_prior_output_survives_runtime_error() {
        let (output, e) = run_expect_runtime_error("print \"before\"; print ghost; print \"after\";");

        assert_eq!(output, "before\n");
        assert!(e.to_string().contains("Undefined variable 'ghost'."));
    }

    #[test]
    fn test_error_07_operand_type_messages() {
        let (_, e) = run_expect_runtime_error("print 1 + \"one\";");
        assert!(e
            .to_string()
            .contains("Operands must be two numbers or two strings."));

        let (_, e) = run_expect_runtime_error("print -nil;");
        assert!(e.to_string().contains("Operand must be a number."));

        let (_, e) = run_expect_runtime_error("print nil < 1;");
        assert!(e.to_string().contains("Operands must be numbers."));
    }

    // ─────────────────────────────────────────────────────────────────
    // Value API surface
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_value_01_type_tags_and_truthiness() {
        use rlox::value::Value;

        assert_eq!(Value::Number(0.0).type_name(), "number");
        assert_eq!(Value::String(String::new()).type_name(), "string");
        assert_eq!(Value::Bool(false).type_name(), "boolean");
        assert_eq!(Value::Nil.type_name(), "nil");

        // Only false and nil are falsy.
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Nil.is_truthy());
    }

    #[test]
    fn test_value_02_equality_is_symmetric_across_variants() {
        use rlox::value::Value;

        let samples = [
            Value::Number(1.0),
            Value::Number(2.0),
            Value::String("a".to_string()),
            Value::String("b".to_string()),
            Value::Bool(true),
            Value::Bool(false),
            Value::Nil,
        ];

        for a in &samples {
            for b in &samples {
                assert_eq!(a.equals(b), b.equals(a), "{} vs {}", a, b);
            }
        }

        // Cross-variant comparisons are always false.
        assert!(!Value::Number(0.0).equals(&Value::Nil));
        assert!(!Value::Bool(false).equals(&Value::Nil));
        assert!(!Value::String("1".to_string()).equals(&Value::Number(1.0)));
    }

    // ─────────────────────────────────────────────────────────────────
    // Strings and printing boundaries
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_strings_01_empty_and_unicode() {
        let output = run_program("print \"\"; print \"héllo ☃\";");

        assert_eq!(output, "\nhéllo ☃\n");
    }

    #[test]
    fn test_strings_02_embedded_newline() {
        let output = run_program("print \"line one\nline two\";");

        assert_eq!(output, "line one\nline two\n");
    }

    #[test]
    fn test_strings_03_number_print_formats() {
        let output = run_program("print 1; print 1.5; print 2.0; print 0.1 + 0.2;");

        assert_eq!(output, "1\n1.5\n2\n0.30000000000000004\n");
    }
}
