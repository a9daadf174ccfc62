use itertools::Itertools;
use proc_macro2::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{
    Error, FnArg, ItemTrait, ReturnType, TraitItem, TraitItemFn, Type, TypeReference,
    parse::{Parse, ParseStream},
    parse_quote,
    spanned::Spanned,
};

/// A hook trait with a single `call_hook(&mut self, a: &A, b: &B, ..) -> anyhow::Result<bool>`.
pub struct IterationHook {
    hook_trait: ItemTrait,
    arg_types: Vec<TypeReference>,
}

fn call_hook_method(hook_trait: &ItemTrait) -> syn::Result<&TraitItemFn> {
    match hook_trait.items.as_slice() {
        [TraitItem::Fn(method)] if method.sig.ident == "call_hook" => Ok(method),
        _ => Err(Error::new(
            hook_trait.ident.span(),
            "hook trait needs exactly one method called `call_hook`",
        )),
    }
}

// Only references to path types, so every argument subset yields a distinct closure signature.
fn hook_argument(arg: &FnArg) -> syn::Result<Option<TypeReference>> {
    let FnArg::Typed(typed) = arg else {
        return Ok(None);
    };
    match typed.ty.as_ref() {
        Type::Reference(reference) if matches!(reference.elem.as_ref(), Type::Path(_)) => {
            Ok(Some(reference.clone()))
        }
        _ => Err(Error::new(
            typed.ty.span(),
            "arguments of `call_hook` must be references",
        )),
    }
}

impl Parse for IterationHook {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let hook_trait: ItemTrait = input.parse()?;
        if !hook_trait.generics.params.is_empty() {
            return Err(Error::new(
                hook_trait.generics.span(),
                "iteration hook traits cannot be generic",
            ));
        }
        let method = call_hook_method(&hook_trait)?;
        if let Some(default) = &method.default {
            return Err(Error::new(
                default.span(),
                "`call_hook` cannot have a default implementation",
            ));
        }
        let expected: Type = parse_quote!(anyhow::Result<bool>);
        if !matches!(&method.sig.output, ReturnType::Type(_, ty) if **ty == expected) {
            return Err(Error::new(
                method.sig.output.span(),
                "`call_hook` has to return anyhow::Result<bool>",
            ));
        }
        let mut arg_types: Vec<TypeReference> = vec![];
        for arg in &method.sig.inputs {
            let Some(reference) = hook_argument(arg)? else {
                continue;
            };
            if arg_types.iter().any(|seen| seen.elem == reference.elem) {
                return Err(Error::new(
                    reference.span(),
                    "arguments of `call_hook` must have distinct types",
                ));
            }
            arg_types.push(reference);
        }
        Ok(Self {
            hook_trait,
            arg_types,
        })
    }
}

impl IterationHook {
    // `impl IntoHook<fn(&A, ..)> for F where F: FnMut(&A, ..)` for one ordered argument subset.
    fn closure_impl(&self, subset: &[usize]) -> TokenStream {
        let trait_name = &self.hook_trait.ident;
        let into_trait_name = format_ident!("Into{}", trait_name);
        let params: Vec<_> = (0..self.arg_types.len())
            .map(|idx| format_ident!("_arg{}", idx))
            .collect();
        let types = &self.arg_types;
        let picked_params = subset.iter().map(|idx| &params[*idx]);
        let picked_types: Vec<_> = subset.iter().map(|idx| &types[*idx]).collect();
        quote! {
            impl<F> #into_trait_name<fn(#(#picked_types,)*) -> anyhow::Result<bool>> for F
            where
                F: FnMut(#(#picked_types,)*) -> anyhow::Result<bool> + Send + 'static,
            {
                fn into_boxed(self) -> Box<dyn #trait_name> {
                    struct ClosureHook<F>(F);
                    impl<F> #trait_name for ClosureHook<F>
                    where
                        F: FnMut(#(#picked_types,)*) -> anyhow::Result<bool> + Send,
                    {
                        fn call_hook(&mut self, #(#params: #types,)*) -> anyhow::Result<bool> {
                            (self.0)(#(#picked_params,)*)
                        }
                    }
                    Box::new(ClosureHook(self))
                }
            }
        }
    }
}

impl ToTokens for IterationHook {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        self.hook_trait.to_tokens(tokens);
        let vis = &self.hook_trait.vis;
        let trait_name = &self.hook_trait.ident;
        let into_trait_name = format_ident!("Into{}", trait_name);
        tokens.extend(quote! {
            #vis trait #into_trait_name<Marker> {
                fn into_boxed(self) -> Box<dyn #trait_name>;
            }
        });
        // closures may take any ordered subset of the hook arguments
        let num_args = self.arg_types.len();
        for len in 0..=num_args {
            for subset in (0..num_args).permutations(len) {
                tokens.extend(self.closure_impl(&subset));
            }
        }
    }
}
