use darling::{util::Flag, FromDeriveInput, FromVariant};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{DeriveInput, Ident};

use crate::generators::{self as gen, CodedVariant, EnumCodeConverter};

#[derive(FromDeriveInput)]
#[darling(supports(enum_any), attributes(sdk_error))]
struct Error {
    ident: Ident,

    data: darling::ast::Data<ErrorVariant, darling::util::Ignored>,

    /// The path to a const set to the module name.
    #[darling(default)]
    module_name: Option<syn::LitStr>,

    /// Whether to sequentially autonumber the error codes.
    /// This option exists as a convenience for runtimes that
    /// only append errors or release only breaking changes.
    #[darling(default)]
    autonumber: Flag,
}

#[derive(FromVariant)]
#[darling(attributes(sdk_error))]
struct ErrorVariant {
    ident: Ident,

    /// The explicit ID of the error code. Overrides any autonumber set on the error enum.
    #[darling(default)]
    code: Option<u32>,

    /// Whether the module name and code are taken from the wrapped error.
    #[darling(default)]
    transparent: Flag,
}

impl CodedVariant for ErrorVariant {
    const FIELD_NAME: &'static str = "code";

    fn ident(&self) -> &Ident {
        &self.ident
    }

    fn code(&self) -> Option<u32> {
        self.code
    }

    fn is_transparent(&self) -> bool {
        self.transparent.is_present()
    }
}

pub fn derive_error(input: DeriveInput) -> TokenStream {
    let error = match Error::from_derive_input(&input) {
        Ok(error) => error,
        Err(e) => return e.write_errors(),
    };

    let error_ty_ident = &error.ident;
    let module_name = match gen::module_name(error.module_name.as_ref()) {
        Ok(expr) => expr,
        Err(e) => return e.to_compile_error(),
    };
    let sdk_crate = gen::sdk_crate_path();

    let variants = match error.data.as_ref().take_enum() {
        Some(variants) => variants,
        None => return quote!(),
    };

    let EnumCodeConverter {
        converter: code_converter,
        ..
    } = match gen::enum_code_converter(
        &format_ident!("self"),
        &variants,
        error.autonumber.is_present(),
        |_| quote!(#sdk_crate::error::Error::code(source)),
    ) {
        Ok(cc) => cc,
        Err(e) => return e.to_compile_error(),
    };

    let transparent_arms: Vec<_> = variants
        .iter()
        .filter(|v| v.is_transparent())
        .map(|v| {
            let ident = &v.ident;
            quote!(Self::#ident(source) => #sdk_crate::error::Error::module_name(source),)
        })
        .collect();
    let module_name_body = if transparent_arms.is_empty() {
        quote!(#module_name)
    } else {
        quote! {
            match self {
                #(#transparent_arms)*
                _ => #module_name,
            }
        }
    };

    gen::wrap_in_const(quote! {
        impl #sdk_crate::error::Error for #error_ty_ident {
            fn module_name(&self) -> &str {
                #module_name_body
            }

            fn code(&self) -> u32 {
                #code_converter
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #[test]
    fn generate_error_impl_auto() {
        let expected: syn::Stmt = syn::parse_quote!(
            const _: () = {
                impl ::evm_runtime_sdk::error::Error for Error {
                    fn module_name(&self) -> &str {
                        MODULE_NAME
                    }
                    fn code(&self) -> u32 {
                        match self {
                            Self::Error0 { .. } => 0u32,
                            Self::Error2 { .. } => 2u32,
                            Self::Error1 { .. } => 1u32,
                            Self::Error3 { .. } => 3u32,
                        }
                    }
                }
            };
        );

        let input: syn::DeriveInput = syn::parse_quote!(
            #[derive(Error)]
            #[sdk_error(autonumber)]
            pub enum Error {
                Error0,
                #[sdk_error(code = 2)]
                Error2 {
                    payload: Vec<u8>,
                },
                Error1(String),
                Error3,
            }
        );
        let error_derivation = super::derive_error(input);
        let actual: syn::Stmt = syn::parse2(error_derivation).unwrap();

        crate::assert_empty_diff!(actual, expected);
    }

    #[test]
    fn generate_error_impl_manual() {
        let expected: syn::Stmt = syn::parse_quote!(
            const _: () = {
                impl ::evm_runtime_sdk::error::Error for Error {
                    fn module_name(&self) -> &str {
                        match self {
                            Self::Core(source) => ::evm_runtime_sdk::error::Error::module_name(source),
                            _ => THE_MODULE_NAME,
                        }
                    }
                    fn code(&self) -> u32 {
                        match self {
                            Self::Error0 { .. } => 1u32,
                            Self::Core(source) => ::evm_runtime_sdk::error::Error::code(source),
                        }
                    }
                }
            };
        );

        let input: syn::DeriveInput = syn::parse_quote!(
            #[derive(Error)]
            #[sdk_error(module_name = "THE_MODULE_NAME")]
            pub enum Error {
                #[sdk_error(code = 1)]
                Error0,
                #[sdk_error(transparent)]
                Core(#[from] CoreError),
            }
        );
        let error_derivation = super::derive_error(input);
        let actual: syn::Stmt = syn::parse2(error_derivation).unwrap();

        crate::assert_empty_diff!(actual, expected);
    }
}
