use proc_macro2::TokenStream;
use quote::quote;
use syn::Ident;

pub fn wrap_in_const(tokens: TokenStream) -> TokenStream {
    quote! {
        const _: () = {
            #tokens
        };
    }
}

/// Path used to refer to `evm_runtime_sdk` items from generated code.
///
/// The SDK declares `extern crate self as evm_runtime_sdk` so the same absolute path also
/// resolves inside the SDK itself.
pub fn sdk_crate_path() -> syn::Path {
    syn::parse_quote!(::evm_runtime_sdk)
}

pub trait CodedVariant {
    /// The field in the helper attribute that yields the value provided by `code`.
    /// For instance, in `#[sdk_event(code = 0)]`, the `FIELD_NAME` would be `code`.
    const FIELD_NAME: &'static str;

    /// The variant ident.
    fn ident(&self) -> &Ident;

    /// The code to which the variant should be converted.
    fn code(&self) -> Option<u32>;

    /// Whether the variant forwards its code to a wrapped value.
    fn is_transparent(&self) -> bool {
        false
    }
}

pub(crate) fn enum_code_converter<V: CodedVariant>(
    enum_binding: &Ident,
    variants: &[&V],
    autonumber: bool,
    transparent_call: impl Fn(&Ident) -> TokenStream,
) -> Result<EnumCodeConverter, syn::Error> {
    if variants.is_empty() {
        return Ok(EnumCodeConverter {
            converter: quote!(0),
            used_codes: vec![0],
        });
    }

    let mut used_codes = Vec::with_capacity(variants.len());
    let mut match_arms = Vec::with_capacity(variants.len());

    let mut next_autonumber = 0u32;
    let mut reserved_numbers = std::collections::BTreeSet::new();

    for variant in variants.iter() {
        let variant_ident = variant.ident();
        if variant.is_transparent() {
            let call = transparent_call(variant_ident);
            match_arms.push(quote!(Self::#variant_ident(source) => { #call }));
            continue;
        }

        let code = match variant.code() {
            Some(code) => {
                if reserved_numbers.contains(&code) {
                    return Err(syn::Error::new(
                        variant_ident.span(),
                        format!("code {} already used", code),
                    ));
                }
                reserved_numbers.insert(code);
                code
            }
            None if autonumber => {
                let mut reserved_successors = reserved_numbers.range(next_autonumber..);
                while reserved_successors.next() == Some(&next_autonumber) {
                    next_autonumber += 1;
                }
                let code = next_autonumber;
                reserved_numbers.insert(code);
                next_autonumber += 1;
                code
            }
            None => {
                return Err(syn::Error::new(
                    variant_ident.span(),
                    format!("missing `{}` for variant", V::FIELD_NAME),
                ));
            }
        };
        match_arms.push(quote!(Self::#variant_ident { .. } => { #code }));
        used_codes.push(code);
    }

    Ok(EnumCodeConverter {
        converter: quote! {
            match #enum_binding {
                #(#match_arms)*
            }
        },
        used_codes,
    })
}

pub(crate) struct EnumCodeConverter {
    /// A `match` expression that encodes an enum's variants as integral codes.
    pub(crate) converter: TokenStream,

    /// The set of codes present in the enum, transparent variants excluded.
    pub(crate) used_codes: Vec<u32>,
}

pub(crate) fn module_name(module_name_lit: Option<&syn::LitStr>) -> Result<syn::Expr, syn::Error> {
    match module_name_lit {
        Some(expr_str) => expr_str.parse::<syn::Expr>().map_err(|_| {
            syn::Error::new(
                expr_str.span(),
                "expected `module_name` to be a valid expression",
            )
        }),
        None => Ok(syn::parse_quote!(MODULE_NAME)),
    }
}
