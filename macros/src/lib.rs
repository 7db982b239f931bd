//! Procedural macros for lambda-lifecycle
//!
//! This crate provides the `#[lifecycle_handler]` attribute macro
//! for wrapping an async processing function in a `Lifecycle`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, LitBool, LitInt, LitStr,
    PathArguments, ReturnType, Type,
};

/// Properties accepted by `#[lifecycle_handler(..)]`.
#[derive(Default)]
struct HandlerArgs {
    strategy: Option<Ident>,
    percentage: Option<u8>,
    wait_for_event_loop: Option<bool>,
}

impl HandlerArgs {
    fn parse(&mut self, meta: syn::meta::ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("strategy") {
            let lit: LitStr = meta.value()?.parse()?;
            self.strategy = Some(strategy_variant(&lit.value(), lit.span())?);
            Ok(())
        } else if meta.path.is_ident("percentage") {
            let lit: LitInt = meta.value()?.parse()?;
            let percentage: u8 = lit.base10_parse()?;
            if percentage > 100 {
                return Err(syn::Error::new(
                    lit.span(),
                    "percentage must be between 0 and 100",
                ));
            }
            self.percentage = Some(percentage);
            Ok(())
        } else if meta.path.is_ident("wait_for_event_loop") {
            let lit: LitBool = meta.value()?.parse()?;
            self.wait_for_event_loop = Some(lit.value);
            Ok(())
        } else {
            Err(meta.error("unsupported lifecycle_handler property"))
        }
    }
}

/// Maps a strategy name to its `ProfileStrategy` variant.
fn strategy_variant(name: &str, span: Span) -> syn::Result<Ident> {
    let variant = match name.trim().to_ascii_uppercase().replace('-', "_").as_str() {
        "ALWAYS" => "Always",
        "NEVER" => "Never",
        "ALL_COLD_STARTS" => "AllColdStarts",
        "ONE_COLD_ONE_WARM" => "OneColdOneWarm",
        "PERCENTAGE" => "Percentage",
        _ => {
            return Err(syn::Error::new(
                span,
                format!(
                    "unknown profile strategy `{}`; expected one of ALWAYS, NEVER, ALL_COLD_STARTS, ONE_COLD_ONE_WARM, PERCENTAGE",
                    name
                ),
            ))
        }
    };
    Ok(Ident::new(variant, span))
}

/// Returns the first generic type argument of the last path segment, if
/// that segment is named `expected`.
fn first_generic<'a>(ty: &'a Type, expected: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != expected {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

/// Attribute macro that generates a `Lifecycle` constructor for an async
/// processing function.
///
/// The decorated function is kept unchanged and must have the signature:
///
/// ```rust,ignore
/// async fn name(ctx: LifecycleContext<EventType>) -> Result<ResultType, BoxError>
/// ```
///
/// A sibling function `name_lifecycle()` is generated. It reads
/// `LifecycleOptions::from_env()`, applies the properties given to the
/// attribute on top, and builds the `Lifecycle`.
///
/// # Properties
///
/// - `strategy = "PERCENTAGE"`: profile strategy name
/// - `percentage = 20`: target percentage for `PERCENTAGE`, `0..=100`
/// - `wait_for_event_loop = false`: respond without awaiting background work
///
/// # Example
///
/// ```rust,ignore
/// use lambda_lifecycle::{lambda, lifecycle_handler, BoxError, LifecycleContext};
///
/// #[lifecycle_handler(strategy = "PERCENTAGE", percentage = 20)]
/// async fn greet(ctx: LifecycleContext<String>) -> Result<String, BoxError> {
///     Ok(format!("hello {}", ctx.event()))
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), lambda_runtime::Error> {
///     lambda::run(greet_lifecycle()?).await
/// }
/// ```
#[proc_macro_attribute]
pub fn lifecycle_handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = HandlerArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let input_fn = parse_macro_input!(item as ItemFn);

    if input_fn.sig.asyncness.is_none() {
        return syn::Error::new(
            input_fn.sig.fn_token.span(),
            "lifecycle_handler function must be async",
        )
        .to_compile_error()
        .into();
    }

    if input_fn.sig.inputs.len() != 1 {
        return syn::Error::new(
            input_fn.sig.inputs.span(),
            "lifecycle_handler function must take exactly one argument: (ctx: LifecycleContext<EventType>)",
        )
        .to_compile_error()
        .into();
    }

    let event_type = match input_fn.sig.inputs.first() {
        Some(FnArg::Typed(pat_type)) => match first_generic(&pat_type.ty, "LifecycleContext") {
            Some(ty) => ty,
            None => {
                return syn::Error::new(
                    pat_type.ty.span(),
                    "argument must be LifecycleContext<EventType>",
                )
                .to_compile_error()
                .into();
            }
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "lifecycle_handler function cannot take self")
                .to_compile_error()
                .into();
        }
        None => unreachable!("argument count checked above"),
    };

    let result_type = match &input_fn.sig.output {
        ReturnType::Type(_, ty) => match first_generic(ty, "Result") {
            Some(ty) => ty,
            None => {
                return syn::Error::new(ty.span(), "lifecycle_handler function must return Result<T, BoxError>")
                    .to_compile_error()
                    .into();
            }
        },
        ReturnType::Default => {
            return syn::Error::new(
                input_fn.sig.span(),
                "lifecycle_handler function must return Result<T, BoxError>",
            )
            .to_compile_error()
            .into();
        }
    };

    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let ctor_name = format_ident!("{}_lifecycle", fn_name);

    let strategy = args.strategy.as_ref().map(|variant| {
        quote! { options = options.with_profile_strategy(::lambda_lifecycle::ProfileStrategy::#variant); }
    });
    let percentage = args.percentage.map(|percentage| {
        quote! { options = options.with_profile_percentage(#percentage); }
    });
    let wait = args.wait_for_event_loop.map(|wait| {
        quote! { options = options.with_wait_for_event_loop(#wait); }
    });

    let output = quote! {
        #input_fn

        /// Builds the lifecycle for this processing function.
        #fn_vis fn #ctor_name() -> ::std::result::Result<
            ::lambda_lifecycle::Lifecycle<#event_type, #result_type>,
            ::lambda_lifecycle::LifecycleError,
        > {
            #[allow(unused_mut)]
            let mut options = ::lambda_lifecycle::LifecycleOptions::from_env()?;
            #strategy
            #percentage
            #wait
            ::lambda_lifecycle::Lifecycle::new(#fn_name, options)
        }
    };

    output.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_variant_accepts_spellings() {
        let span = Span::call_site();
        assert_eq!(strategy_variant("PERCENTAGE", span).unwrap(), "Percentage");
        assert_eq!(strategy_variant("one-cold-one-warm", span).unwrap(), "OneColdOneWarm");
        assert_eq!(strategy_variant("all_cold_starts", span).unwrap(), "AllColdStarts");
        assert!(strategy_variant("SOMETIMES", span).is_err());
    }

    fn render(ty: Option<&Type>) -> Option<String> {
        ty.map(|ty| quote!(#ty).to_string())
    }

    #[test]
    fn test_first_generic_extracts_types() {
        let ctx: Type = syn::parse_quote!(lambda_lifecycle::LifecycleContext<MyEvent>);
        assert_eq!(render(first_generic(&ctx, "LifecycleContext")), Some("MyEvent".to_string()));

        let result: Type = syn::parse_quote!(Result<Vec<u8>, BoxError>);
        assert_eq!(
            render(first_generic(&result, "Result")),
            Some(quote!(Vec<u8>).to_string())
        );

        let other: Type = syn::parse_quote!(Option<u8>);
        assert!(first_generic(&other, "Result").is_none());
    }
}
