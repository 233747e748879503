use darling::FromDeriveInput;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::generators::{self as gen, CodedVariant, EnumCodeConverter};

#[derive(FromDeriveInput)]
#[darling(supports(enum_any), attributes(sdk_event))]
struct Event {
    ident: syn::Ident,

    data: darling::ast::Data<EventVariant, darling::util::Ignored>,

    /// The path to a const set to the module name.
    #[darling(default)]
    module_name: Option<syn::LitStr>,

    /// Whether to sequentially autonumber the event codes.
    /// This option exists as a convenience for runtimes that
    /// only append events or release only breaking changes.
    #[darling(default, rename = "autonumber")]
    autonumber: darling::util::Flag,
}

#[derive(darling::FromVariant)]
#[darling(attributes(sdk_event))]
struct EventVariant {
    ident: syn::Ident,

    /// The explicit ID of the event code. Overrides any autonumber set on the event enum.
    #[darling(default, rename = "code")]
    code: Option<u32>,
}

impl CodedVariant for EventVariant {
    const FIELD_NAME: &'static str = "code";

    fn ident(&self) -> &syn::Ident {
        &self.ident
    }

    fn code(&self) -> Option<u32> {
        self.code
    }
}

pub fn derive_event(input: syn::DeriveInput) -> TokenStream {
    let event = match Event::from_derive_input(&input) {
        Ok(event) => event,
        Err(e) => return e.write_errors(),
    };

    let event_ty_ident = &event.ident;
    let module_name = match gen::module_name(event.module_name.as_ref()) {
        Ok(expr) => expr,
        Err(e) => return e.to_compile_error(),
    };

    let variants = match event.data.as_ref().take_enum() {
        Some(variants) => variants,
        None => return quote!(),
    };

    let EnumCodeConverter {
        converter: code_converter,
        used_codes,
    } = match gen::enum_code_converter(
        &format_ident!("self"),
        &variants,
        event.autonumber.is_present(),
        |_| quote!(),
    ) {
        Ok(cc) => cc,
        Err(e) => return e.to_compile_error(),
    };

    let sdk_crate = gen::sdk_crate_path();

    gen::wrap_in_const(quote! {
        impl #sdk_crate::event::Event for #event_ty_ident {
            fn module_name() -> &'static str {
                #module_name
            }

            fn code(&self) -> u32 {
                #code_converter
            }

            fn has_variant_with_code(code: u32) -> bool {
                return false #(|| code == #used_codes)*
            }
        }
    })
}
