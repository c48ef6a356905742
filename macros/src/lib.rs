//! Procedural macros shared by the lanes crates.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, Ident, ItemFn, Lit, Meta, NestedMeta};

/// Levels accepted by [macro@test_traced].
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test with a `tracing` subscriber installed for its duration.
///
/// The level defaults to `DEBUG` and may be overridden with either a bare string
/// (`#[test_traced("TRACE")]`) or a named argument (`#[test_traced(level = "INFO")]`).
///
/// Crates using this attribute must list `tracing` and `tracing-subscriber` as
/// dev-dependencies.
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttributeArgs);
    let input = parse_macro_input!(item as ItemFn);

    let level = match parse_level(&args) {
        Ok(level) => level,
        Err(err) => return err.to_compile_error().into(),
    };
    let level = Ident::new(&level, Span::call_site());

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(::tracing::Level::#level)
                .with_line_number(true)
                .with_thread_names(true)
                .finish();
            let dispatcher = ::tracing::Dispatch::new(subscriber);
            ::tracing::dispatcher::with_default(&dispatcher, || #block)
        }
    };
    expanded.into()
}

fn parse_level(args: &[NestedMeta]) -> Result<String, syn::Error> {
    let literal = match args {
        [] => return Ok("DEBUG".to_string()),
        [NestedMeta::Lit(Lit::Str(literal))] => literal,
        [NestedMeta::Meta(Meta::NameValue(pair))] if pair.path.is_ident("level") => {
            match &pair.lit {
                Lit::Str(literal) => literal,
                other => return Err(syn::Error::new_spanned(other, "level must be a string")),
            }
        }
        [first, ..] => {
            return Err(syn::Error::new_spanned(
                first,
                "expected a level such as \"INFO\" or level = \"INFO\"",
            ))
        }
    };
    let level = literal.value().to_uppercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(syn::Error::new(
            literal.span(),
            format!("unknown level `{level}`, expected one of {LEVELS:?}"),
        ));
    }
    Ok(level)
}
