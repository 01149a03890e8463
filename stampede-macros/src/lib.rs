use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{spanned::Spanned, ItemFn};

/// Proc macro to denote a Transaction
///
/// Wraps an `async` function returning `Result<T, E>`. When called from inside a VU, every
/// call is timed into the `<fn name>_duration` trend (milliseconds) and its outcome recorded
/// into the `<fn name>_failed` rate of the run's metrics.
///
/// # Example
/// ```ignore
/// use stampede::prelude::*;
///
/// #[transaction]
/// async fn create_url(ctx: &StepContext, url: &str) -> Result<String, TransportError> {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn transaction(attr: TokenStream, item: TokenStream) -> TokenStream {
    transaction_internal(attr.into(), item.into()).into()
}

fn transaction_internal(_attr: TokenStream2, item: TokenStream2) -> TokenStream2 {
    let input = match syn::parse2::<ItemFn>(item) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    if input.sig.asyncness.is_none() {
        return syn::Error::new(input.sig.span(), "#[transaction] requires an async fn")
            .to_compile_error();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;
    let name = &sig.ident;
    let stmts = &block.stmts;

    quote! {
        #(#attrs)* #vis #sig {
            ::stampede::transaction::transaction_hook(stringify!(#name), async move {
                #(#stmts)*
            }).await
        }
    }
}
