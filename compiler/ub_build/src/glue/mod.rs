//! Generated native sources bridging managed and native code.
//!
//! Three sources are produced per half:
//! - the main stub, which registers every ahead-of-time compiled module
//!   with the runtime and calls the registration methods;
//! - the class registration table for types marked `[Register]`;
//! - foreign-function wrappers that catch native exceptions around calls
//!   into the Objective-C message dispatcher.
//!
//! Generation is pure: these functions only build text. The task
//! scheduler writes the text to disk as a producer task.

use std::fmt::Write as _;

use crate::image::{EntryPoint, TypeDecl};
use crate::module::ModuleSet;

/// Attribute marking a managed type that is exported to the native runtime.
pub const REGISTER_ATTRIBUTE: &str = "Register";

/// Native function created by the registration source.
pub const REGISTRATION_METHOD: &str = "ub_create_classes";

/// Prefix of dispatcher symbols that get an exception-catching wrapper.
const DISPATCH_PREFIX: &str = "objc_msgSend";

const GENERATED_HEADER: &str = "/* Generated by ubuild. Do not edit. */\n";

/// C identifier for a module name: anything not alphanumeric becomes `_`.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Symbol of the AOT image info the compiler emits for a module.
pub fn aot_module_symbol(module_name: &str) -> String {
    format!("ub_aot_module_{}_info", sanitize_identifier(module_name))
}

/// Inputs to the main stub.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MainStub {
    /// Name of the root module, passed to the runtime entry point.
    pub root_module: String,
    /// Modules with an AOT image, in registration order.
    pub aot_modules: Vec<String>,
    /// Native functions to call before the runtime starts.
    pub registration_methods: Vec<String>,
    pub debug: bool,
    pub profiling: bool,
}

impl MainStub {
    pub fn source(&self) -> String {
        let mut out = String::from(GENERATED_HEADER);
        out.push_str("#include <stdlib.h>\n\n");
        out.push_str("extern void ub_register_aot_module (void *info);\n");
        out.push_str("extern int ub_runtime_main (int argc, char **argv, const char *root_module);\n");
        if self.profiling {
            out.push_str("extern void ub_profiler_startup (const char *desc);\n");
        }
        for module in &self.aot_modules {
            let _ = writeln!(out, "extern void *{};", aot_module_symbol(module));
        }
        for method in &self.registration_methods {
            let _ = writeln!(out, "extern void {method} (void);");
        }

        out.push_str("\nstatic void ub_register_modules (void)\n{\n");
        for module in &self.aot_modules {
            let _ = writeln!(out, "\tub_register_aot_module ({});", aot_module_symbol(module));
        }
        out.push_str("}\n\nstatic void ub_setup (void)\n{\n");
        if self.debug {
            out.push_str("\tsetenv (\"UB_DEBUG\", \"1\", 1);\n");
        }
        if self.profiling {
            out.push_str("\tub_profiler_startup (\"log\");\n");
        }
        for method in &self.registration_methods {
            let _ = writeln!(out, "\t{method} ();");
        }
        out.push_str("}\n\nint\nmain (int argc, char **argv)\n{\n");
        out.push_str("\tub_register_modules ();\n\tub_setup ();\n");
        let _ = writeln!(
            out,
            "\treturn ub_runtime_main (argc, argv, \"{}\");",
            self.root_module.replace('\\', "\\\\").replace('"', "\\\"")
        );
        out.push_str("}\n");
        out
    }
}

/// One exported class: native name and the managed type that backs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredClass {
    pub native_name: String,
    pub managed_type: String,
    pub module: String,
}

/// Every `[Register]` type in the set, nested types included.
///
/// The native name is the attribute's first string argument, or the
/// managed type name when absent.
pub fn registered_classes(modules: &ModuleSet) -> Vec<RegisteredClass> {
    fn visit(decl: &TypeDecl, prefix: &str, module: &str, out: &mut Vec<RegisteredClass>) {
        let managed_type = if prefix.is_empty() {
            decl.name.clone()
        } else {
            format!("{prefix}/{}", decl.name)
        };
        if let Some(attr) = decl
            .attributes
            .iter()
            .find(|a| a.type_name == REGISTER_ATTRIBUTE)
        {
            let native_name = attr
                .ctor_args
                .first()
                .and_then(|a| a.as_str())
                .map_or_else(|| sanitize_identifier(&decl.name), str::to_string);
            out.push(RegisteredClass {
                native_name,
                managed_type: managed_type.clone(),
                module: module.to_string(),
            });
        }
        for nested in &decl.nested {
            visit(nested, &managed_type, module, out);
        }
    }

    let mut classes = Vec::new();
    for module in modules {
        if module.is_platform_module {
            continue;
        }
        for decl in &module.image.types {
            visit(decl, "", &module.name, &mut classes);
        }
    }
    classes
}

/// Registration source for `classes`.
pub fn registration_source(classes: &[RegisteredClass]) -> String {
    let mut out = String::from(GENERATED_HEADER);
    out.push_str("struct ub_class_map { const char *native_name; const char *managed_type; const char *module; };\n");
    out.push_str("extern void ub_register_class_map (const struct ub_class_map *map, int count);\n\n");
    out.push_str("static const struct ub_class_map class_map [] = {\n");
    for class in classes {
        let _ = writeln!(
            out,
            "\t{{ \"{}\", \"{}\", \"{}\" }},",
            class.native_name, class.managed_type, class.module
        );
    }
    out.push_str("\t{ 0, 0, 0 },\n};\n\n");
    let _ = writeln!(out, "void {REGISTRATION_METHOD} (void)\n{{");
    let _ = writeln!(out, "\tub_register_class_map (class_map, {});", classes.len());
    out.push_str("}\n");
    out
}

/// Dispatcher symbols among `entry_points` that need a wrapper, sorted and
/// without duplicates.
pub fn wrapped_symbols(entry_points: &[EntryPoint]) -> Vec<String> {
    let mut symbols: Vec<String> = entry_points
        .iter()
        .filter(|e| e.symbol.starts_with(DISPATCH_PREFIX))
        .map(|e| e.symbol.clone())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Name of the wrapper generated for a dispatcher symbol.
pub fn wrapper_name(symbol: &str) -> String {
    format!("ub_pinvoke_wrapper_{}", sanitize_identifier(symbol))
}

/// Wrapper source: each dispatcher call runs inside an exception handler
/// that converts native exceptions into managed ones.
pub fn wrapper_source(symbols: &[String]) -> String {
    let mut out = String::from(GENERATED_HEADER);
    out.push_str("#include <objc/message.h>\n\n");
    out.push_str("extern void ub_process_native_exception (id exception);\n\n");
    for symbol in symbols {
        let _ = writeln!(
            out,
            "void *\n{} (id self, SEL sel, void *arg)\n{{\n\t@try {{\n\t\treturn ((void *(*)(id, SEL, void *)) {symbol}) (self, sel, arg);\n\t}} @catch (id exc) {{\n\t\tub_process_native_exception (exc);\n\t}}\n\treturn 0;\n}}\n",
            wrapper_name(symbol)
        );
    }
    out
}
