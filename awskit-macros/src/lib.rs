//! Helper macro for registering awskit SQS listeners
//!
//! Registering a handler with [`awskit`'s] listener registry requires building a
//! listener configuration and binding the handler's payload type through the
//! typed `register` call. This attribute macro keeps the handler function as
//! written and generates a companion `register_<name>` function that performs
//! the registration against the default registry.
use proc_macro::TokenStream;
use quote::{format_ident, quote, ToTokens};
use syn::{parse_macro_input, ItemFn, LitInt, LitStr};

/// Declares an async function as an SQS listener.
///
/// ```ignore
/// #[sqs_listener(queue = "orders-queue", max_concurrent_messages = 5)]
/// async fn handle_order(message: Message<Order>) -> Result<(), Error> {
///     // ...
///     Ok(())
/// }
///
/// // generated; call during startup:
/// register_handle_order()?;
/// ```
///
/// Recognized keys: `queue` (required), `max_concurrent_messages`,
/// `poll_max_messages`, `poll_wait_time_seconds` and
/// `visibility_timeout_seconds`. All other listener options are available
/// through the builder on `ListenerRegistry` directly.
#[proc_macro_attribute]
pub fn sqs_listener(attr: TokenStream, input: TokenStream) -> TokenStream {
    let func = parse_macro_input!(input as ItemFn);
    let func_name = func.sig.ident.clone();
    let func_key = func_name.to_string();
    let register_name = format_ident!("register_{}", func_name);
    let register_doc = format!(
        "Registers [`{func_name}`] as an SQS listener with the default registry."
    );

    let mut queue: Option<LitStr> = None;
    let mut setters = proc_macro2::TokenStream::new();

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("queue") {
            queue = Some(meta.value()?.parse()?);
            return Ok(());
        }
        for key in [
            "max_concurrent_messages",
            "poll_max_messages",
            "poll_wait_time_seconds",
            "visibility_timeout_seconds",
        ] {
            if meta.path.is_ident(key) {
                let setter = format_ident!("{}", key);
                let value: LitInt = meta.value()?.parse()?;
                setters.extend(quote! { .#setter(#value) });
                return Ok(());
            }
        }
        Err(meta.error("unrecognized sqs_listener option"))
    });
    parse_macro_input!(attr with parser);

    let queue = match queue {
        Some(q) => q,
        None => {
            return syn::Error::new_spanned(
                &func.sig,
                "sqs_listener requires a `queue = \"...\"` option",
            )
            .to_compile_error()
            .into()
        }
    };

    quote! {
        #func

        #[doc = #register_doc]
        pub fn #register_name() -> Result<(), awskit::Error> {
            awskit::ListenerRegistry::global()
                .listener(#queue)
                #setters
                .register(#func_key, #func_name)
        }
    }
    .to_token_stream()
    .into()
}
