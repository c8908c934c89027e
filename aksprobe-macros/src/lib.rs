//! Proc macros for the aksprobe validation suite
//!
//! Provides the `#[aksprobe::test]` attribute macro.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::{Expr, FnArg, Ident, ItemFn, Pat, PatType, Path, ReturnType, Token};

/// Attribute macro for tests that need a namespace in the cluster.
///
/// Creates a `Context` owning a namespace, hands it to the test as `ctx`,
/// and deletes the namespace (plus any manifests applied through the
/// context) when the test finishes, whether it passed, returned an error
/// or panicked.
///
/// # Example
///
/// ```ignore
/// use aksprobe::Context;
///
/// #[aksprobe::test(namespace = "aksinternetns")]
/// async fn test_nginx(ctx: Context) {
///     ctx.apply_manifest("./nginx-deployment.yml").await.unwrap();
/// }
///
/// // Namespace computed at run time
/// #[aksprobe::test(namespace = targets::workload().namespace)]
/// async fn test_configured(ctx: Context) {}
///
/// // Random `aksprobe-xxxxxxxx` namespace
/// #[aksprobe::test]
/// async fn test_with_result(ctx: Context) -> Result<(), Box<dyn std::error::Error>> {
///     ctx.apply_manifest("./nginx-deployment.yml").await?;
///     Ok(())
/// }
/// ```
///
/// Inside the test `ctx` is a `&Context`.
///
/// `namespace` takes any expression convertible into a `String`, evaluated
/// after `setup`.
///
/// `setup = path::to::fn` names a plain `fn()` that runs before the
/// namespace is created, e.g. to fetch cluster credentials. It should
/// panic on failure. Only valid on tests taking `ctx`.
///
/// # Environment Variables
///
/// - `AKSPROBE_KEEP_NAMESPACE` - skip cleanup, leaving the namespace for
///   inspection
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = syn::parse_macro_input!(attr as TestArgs);
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    test_impl(&args, &input_fn).into()
}

/// Arguments of `#[aksprobe::test(...)]`
#[derive(Default)]
struct TestArgs {
    namespace: Option<Expr>,
    setup: Option<Path>,
}

impl Parse for TestArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = Self::default();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            if key == "namespace" && args.namespace.is_none() {
                args.namespace = Some(input.parse()?);
            } else if key == "setup" && args.setup.is_none() {
                args.setup = Some(input.parse()?);
            } else {
                return Err(syn::Error::new(
                    key.span(),
                    "expected `namespace = <expr>` or `setup = path::to::fn`, each at most once",
                ));
            }

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }

        Ok(args)
    }
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

/// Check if a function has an explicit return type (e.g., `-> Result<...>`)
fn has_result_return(input_fn: &ItemFn) -> bool {
    matches!(&input_fn.sig.output, ReturnType::Type(..))
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(args: &TestArgs, input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;

    if input_fn.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&input_fn.sig.fn_token, "#[aksprobe::test] requires an async fn")
            .to_compile_error();
    }

    if !has_ctx_param(input_fn) {
        if let Some(setup) = &args.setup {
            return syn::Error::new_spanned(setup, "`setup` requires a `ctx: Context` parameter")
                .to_compile_error();
        }

        // No ctx parameter - just wrap with tokio::test
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() #fn_output {
                ::aksprobe::telemetry::init_logging();
                #fn_block
            }
        };
    }

    let inner_name = format_ident!("__aksprobe_{}", fn_name);
    let setup = args.setup.as_ref().map(|path| quote! { #path(); });
    let ctx_init = match &args.namespace {
        Some(ns) => quote! { ::aksprobe::Context::with_namespace(#ns) },
        None => quote! { ::aksprobe::Context::new() },
    };

    let report = if has_result_return(input_fn) {
        quote! {
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => panic!("{} returned an error: {:?}", stringify!(#fn_name), e),
                Err(panic_info) => std::panic::resume_unwind(panic_info),
            }
        }
    } else {
        quote! {
            if let Err(panic_info) = outcome {
                std::panic::resume_unwind(panic_info);
            }
        }
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name() {
            use ::aksprobe::__private::futures::FutureExt;

            #[allow(non_snake_case)]
            async fn #inner_name(ctx: &::aksprobe::Context) #fn_output #fn_block

            ::aksprobe::telemetry::init_logging();

            #setup

            let owned_ctx = #ctx_init
                .await
                .unwrap_or_else(|e| panic!("Failed to create Context: {}", e));

            // Run test and catch any panics
            let outcome = std::panic::AssertUnwindSafe(#inner_name(&owned_ctx))
                .catch_unwind()
                .await;

            // Cleanup on every path unless AKSPROBE_KEEP_NAMESPACE is set
            if std::env::var_os("AKSPROBE_KEEP_NAMESPACE").is_some() {
                eprintln!(
                    "[aksprobe] AKSPROBE_KEEP_NAMESPACE set - keeping namespace: {}",
                    owned_ctx.namespace
                );
            } else if let Err(e) = owned_ctx.cleanup().await {
                eprintln!("[aksprobe] Warning: cleanup failed: {}", e);
            }

            #report
        }
    }
}
