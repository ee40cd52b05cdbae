use pretty_assertions::assert_eq;

use cas_rs::cc::CodegenError;
use cas_rs::{compile, compile_with, CompileError, CompilerConfig, CpuConfig, Emulator, Exit, VirtualHost};

/// Compile, run on a deterministic host, and return the exit plus captured stdout.
fn run(src: &str) -> (Exit, String) {
    let c = compile(src).unwrap_or_else(|e| panic!("{e}\n{src}"));
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&c.image).unwrap();
    let exit = emu.run().unwrap_or_else(|t| panic!("{t}\n{}", c.asm));
    (exit, emu.kernel.host.stdout_str())
}

fn code(src: &str) -> i32 {
    run(src).0.code
}

#[test]
fn arrays_with_initializers() {
    let src = r#"
        int main() {
            int a[5] = {5, 4, 3, 2, 1};
            int s = 0;
            for (int i = 0; i < 5; i++) {
                s = s * 10 + a[i];
            }
            a[2] = 9;
            return s + a[2];
        }
    "#;
    assert_eq!(code(src), 54330);
}

#[test]
fn element_updates_evaluate_the_index_once() {
    let src = r#"
        int main() {
            int a[4] = {0, 0, 0, 0};
            int i = 0;
            a[i++] += 5;
            return i * 100 + a[0] * 10 + a[1];
        }
    "#;
    assert_eq!(code(src), 150);
    assert_eq!(code("int main() { int a[2] = {0, 0}; int i = 0; a[i++]++; return i * 10 + a[0]; }"), 11);
    assert_eq!(code("int main() { int a[3] = {1, 2, 3}; int i = 2; int v = --a[--i]; return i * 100 + v * 10 + a[1]; }"), 111);
    let src = r#"
        int main() {
            char s[] = "abc";
            int b[2] = {1, 2};
            int i = 0;
            s[i + 1] += b[i + 1];
            return s[1];
        }
    "#;
    assert_eq!(code(src), b'd' as i32);
}

#[test]
fn partially_initialized_arrays_are_zero_filled() {
    assert_eq!(code("int main() { int a[4] = {7}; return a[0] + a[3]; }"), 7);
}

#[test]
fn code_may_not_grow_into_the_data_region() {
    let body = "x = x + 1; ".repeat(2200);
    let src = format!("int main() {{ int a[2] = {{7, 7}}; int x = 0; {body} return x + a[1]; }}");
    match compile(&src) {
        Err(CompileError::Codegen(CodegenError::CodeOverlapsData { code_end, data_base })) => {
            assert!(code_end > data_base);
            assert_eq!(data_base, 0x6000);
        }
        other => panic!("expected CodeOverlapsData, got {:?}", other.map(|c| c.image.end())),
    }
    let roomy = CompilerConfig { data_base: 0x1_0000, ..CompilerConfig::default() };
    let c = compile_with(&src, &roomy).unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&c.image).unwrap();
    assert_eq!(emu.run().unwrap().code, 2207);
}

#[test]
fn oversized_arrays_are_rejected() {
    for src in [
        "int main() { int a[2147483647]; return 0; }",
        "int main() { int a[0x40000000]; return 0; }",
        "int main() { char a[0x20000]; return 0; }",
        "int main() { int a[0x6000]; int b[0x2000]; return 0; }",
    ] {
        assert!(
            matches!(compile(src), Err(CompileError::Codegen(CodegenError::ArrayTooLarge { .. }))),
            "{src}"
        );
    }
    assert_eq!(code("int main() { char big[0x19000]; big[0x18fff] = 9; return big[0x18fff]; }"), 9);
}

#[test]
fn char_arrays_from_strings() {
    assert_eq!(code(r#"int main() { char s[] = "hello"; return strlen(s); }"#), 5);
    assert_eq!(code(r#"int main() { char s[] = "hello"; return s[1]; }"#), 101);
    assert_eq!(code(r#"int main() { char s[8] = "ab"; s[1] = 'z'; return s[1] + s[5]; }"#), 122);
}

#[test]
fn recursion() {
    let src = r#"
        int fib(int n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        int main() { return fib(10); }
    "#;
    assert_eq!(code(src), 55);
}

#[test]
fn calls_preserve_caller_variables() {
    let src = r#"
        int twice(int x) { int y = x + x; return y; }
        int main() {
            int a = 5;
            int b = twice(a);
            return a * 100 + b;
        }
    "#;
    assert_eq!(code(src), 510);
}

#[test]
fn class_fields() {
    let src = r#"
        class Point { int x, y; };
        int main() {
            Point p;
            p.x = 3;
            p.y = 4;
            return p.x * p.y;
        }
    "#;
    assert_eq!(code(src), 12);
}

#[test]
fn loops_with_break_and_continue() {
    let src = r#"
        int main() {
            int i = 0;
            int sum = 0;
            while (true) {
                i++;
                if (i >= 10) break;
                if (i % 2 == 0) continue;
                sum += i;
            }
            return sum;
        }
    "#;
    assert_eq!(code(src), 25);
    assert_eq!(code("int main() { int n = 0; do { n++; } while (n < 5); return n; }"), 5);
    assert_eq!(code("int main() { int n = 7; do { n++; } while (false); return n; }"), 8);
}

#[test]
fn short_circuit_logic() {
    let src = r#"
        int main() {
            int a[2] = {1, 2};
            int i = 5;
            if (i < 2 && a[i] == 1) return 1;
            if (i > 2 || a[i] == 1) return 2;
            return 3;
        }
    "#;
    assert_eq!(code(src), 2);
}

#[test]
fn builtins() {
    assert_eq!(code("int main() { return min(3, 7) * 10 + max(3, 7); }"), 37);
    assert_eq!(code("int main() { return clamp(15, 0, 10) + clamp(-4, 0, 10); }"), 10);
    assert_eq!(code("int main() { return lerp(0, 100, 128); }"), 50);
    assert_eq!(code("int main() { int a = 1; int b = 2; swap(a, b); return a * 10 + b; }"), 21);
    assert_eq!(code("int main() { return abs(-9) + popcount(0xF0); }"), 13);
    assert_eq!(code("int main() { return sqrt(144) + pow(2, 5); }"), 44);
}

#[test]
fn global_constants() {
    assert_eq!(code("const int K = 6; int main() { return K * 7; }"), 42);
}

#[test]
fn operators_and_compound_assignment() {
    let src = r#"
        int main() {
            int x = 100;
            x -= 10;
            x /= 3;
            x *= 4;
            x %= 50;
            int y = (x << 2) | 1;
            y = y ^ 0x10;
            return y + (-y >> 31) + ~0 + !0;
        }
    "#;
    // x = 20, y = 81 ^ 16 = 65, and `>>` is arithmetic
    assert_eq!(code(src), 65 - 1 - 1 + 1);
}

#[test]
fn printf_writes_to_stdout() {
    let (exit, out) = run(r#"int main() { printf("n=%d\n", 42); return 0; }"#);
    assert_eq!(out, "n=42\n");
    assert_eq!(exit.code, 0);
}

#[test]
fn inline_assembly_is_spliced_in() {
    assert_eq!(code(r#"int main() { int x = 41; asm("INC R4"); return x; }"#), 42);
}

fn locals(n: usize) -> String {
    let decls: String = (0..n).map(|i| format!("int v{i} = {i}; ")).collect();
    let sum: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
    format!("int main() {{ {decls} return {}; }}", sum.join(" + "))
}

#[test]
fn register_budget() {
    assert_eq!(code(&locals(9)), 36);
    match compile(&locals(10)) {
        Err(CompileError::Codegen(CodegenError::OutOfRegisters { name, budget, .. })) => {
            assert_eq!(name, "v9");
            assert_eq!(budget, 9);
        }
        other => panic!("expected OutOfRegisters, got {other:?}"),
    }
    let tight = CompilerConfig { register_budget: 3, ..CompilerConfig::default() };
    assert!(compile_with(&locals(3), &tight).is_ok());
    assert!(matches!(
        compile_with(&locals(4), &tight),
        Err(CompileError::Codegen(CodegenError::OutOfRegisters { budget: 3, .. }))
    ));
}

#[test]
fn errors_are_classified() {
    assert!(matches!(compile("int main() { return 1 }"), Err(CompileError::Syntax(_))));
    assert!(matches!(
        compile("int main() { return nope; }"),
        Err(CompileError::Codegen(CodegenError::UndefinedIdentifier { .. }))
    ));
    assert!(matches!(
        compile("int main() { return f(1); } int f(int a, int b) { return a; }"),
        Err(CompileError::Codegen(CodegenError::ArityMismatch { expected: 2, found: 1, .. }))
    ));
    assert!(matches!(
        compile("int main() { continue; }"),
        Err(CompileError::Codegen(CodegenError::ContinueOutsideLoop { .. }))
    ));
    let err = compile("int main() {\n  int x = 1;\n  return y;\n}").unwrap_err();
    let CompileError::Codegen(e) = err else { panic!("expected a codegen error") };
    assert_eq!(e.pos().map(|p| p.line), Some(3));
}

#[test]
fn emitted_assembly_reassembles() {
    let c = compile("int main() { int a[3] = {1, 2, 3}; return a[0] + a[2]; }").unwrap();
    let again = cas_rs::assemble_at(&c.asm, CompilerConfig::default().origin).unwrap();
    assert_eq!(again.bytes, c.image.bytes);
}
