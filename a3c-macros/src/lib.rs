mod iteration_hook;

use iteration_hook::IterationHook;
use quote::quote;
use syn::parse_macro_input;

/// Turns a single method hook trait into something closures can be boxed into.
///
/// The trait must have exactly one method, `call_hook`, taking only unique reference arguments
/// and returning `anyhow::Result<bool>`. For a trait `Foo` the macro also emits `IntoFoo<Marker>`
/// implemented for every closure that takes any ordered subset of the hook arguments.
#[proc_macro_attribute]
pub fn iteration_hook(
    _attr: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let hook = parse_macro_input! { item as IterationHook };
    quote! { #hook }.into()
}
