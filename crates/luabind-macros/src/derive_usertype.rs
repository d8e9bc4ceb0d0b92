//! Implementation of the `#[derive(Usertype)]` macro.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

use crate::attrs::{ClassAttr, FieldAttrs, TypeAttrs};

pub fn derive_usertype_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_usertype_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_usertype_inner(input: &DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "generic usertypes are not supported: each usertype needs one script name",
        ));
    }

    let name = &input.ident;
    let attrs = TypeAttrs::from_attrs(&input.attrs)?;
    let script_name = attrs
        .name
        .clone()
        .unwrap_or_else(|| LitStr::new(&name.to_string(), name.span()));
    let class = attrs.class.unwrap_or(ClassAttr::Boxed);

    let members = collect_members(input)?;
    let usertype_impl = generate_usertype_impl(name, &script_name, class, &members);
    let assertions = generate_assertions(name, &script_name, class);
    let codec = generate_codec(name, class, attrs.clone);

    Ok(quote! {
        #usertype_impl
        #assertions
        #codec
    })
}

/// Generate the `UserType` implementation.
fn generate_usertype_impl(
    name: &syn::Ident,
    script_name: &LitStr,
    class: ClassAttr,
    members: &[TokenStream2],
) -> TokenStream2 {
    let class_tokens = match class {
        ClassAttr::Flat => quote! { ::luabind_core::MemoryClass::Flat },
        ClassAttr::Boxed => quote! { ::luabind_core::MemoryClass::Boxed },
    };

    quote! {
        impl ::luabind_core::UserType for #name {
            const NAME: &'static str = #script_name;
            const CLASS: ::luabind_core::MemoryClass = #class_tokens;

            fn members() -> ::luabind_core::MemberTable<Self> {
                ::luabind_core::MemberTable::new()
                    #(#members)*
            }
        }
    }
}

/// Compile-time checks on the name and, for flat types, the layout budget.
fn generate_assertions(name: &syn::Ident, script_name: &LitStr, class: ClassAttr) -> TokenStream2 {
    let flat_checks = match class {
        ClassAttr::Flat => quote! {
            assert!(
                ::core::mem::size_of::<#name>() <= ::luabind_core::FLAT_CAPACITY,
                "flat usertypes must fit in 24 bytes"
            );
            assert!(
                ::core::mem::align_of::<#name>() <= ::luabind_core::usertype::FLAT_ALIGN,
                "flat usertypes must be at most 8-byte aligned"
            );
        },
        ClassAttr::Boxed => quote! {},
    };
    let copy_check = match class {
        ClassAttr::Flat => quote! {
            const _: fn() = || {
                fn flat_usertypes_are_copy<T: ::core::marker::Copy>() {}
                flat_usertypes_are_copy::<#name>();
            };
        },
        ClassAttr::Boxed => quote! {},
    };

    quote! {
        const _: () = {
            assert!(
                ::luabind_core::name::is_valid(#script_name),
                "usertype names must be dotted identifiers"
            );
            #flat_checks
        };
        #copy_check
    }
}

/// Generate `Push`, plus `Get` for flat and `clone` types.
fn generate_codec(name: &syn::Ident, class: ClassAttr, clone: bool) -> TokenStream2 {
    let push = quote! {
        impl ::luabind_core::Push for #name {
            fn push(self, stack: ::luabind_core::Stack) -> ::luabind_core::Result<()> {
                ::luabind_core::usertype::push_usertype(stack, self)
            }
        }
    };

    let read = match (class, clone) {
        (ClassAttr::Flat, _) => quote! { ::luabind_core::usertype::get_flat::<Self>(stack, index) },
        (ClassAttr::Boxed, true) => quote! { ::luabind_core::usertype::get_cloned::<Self>(stack, index) },
        (ClassAttr::Boxed, false) => return push,
    };

    quote! {
        #push

        impl ::luabind_core::Get for #name {
            fn shape() -> ::luabind_core::Shape {
                ::luabind_core::Shape::Usertype(<Self as ::luabind_core::UserType>::NAME)
            }

            fn check(stack: ::luabind_core::Stack, index: ::std::os::raw::c_int) -> bool {
                ::luabind_core::usertype::check_usertype::<Self>(stack, index)
            }

            fn get(
                stack: ::luabind_core::Stack,
                index: ::std::os::raw::c_int,
            ) -> ::luabind_core::Result<Self> {
                #read
            }
        }
    }
}

/// Collect member table builder calls from annotated struct fields.
fn collect_members(input: &DeriveInput) -> syn::Result<Vec<TokenStream2>> {
    let mut members = Vec::new();

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Usertype can only be derived for structs",
            ));
        }
    };

    let Fields::Named(fields) = fields else {
        return Ok(members);
    };

    for field in &fields.named {
        let field_attrs = FieldAttrs::from_attrs(&field.attrs)?;

        if !field_attrs.get && !field_attrs.set {
            continue;
        }
        if field_attrs.set && !field_attrs.get {
            return Err(syn::Error::new_spanned(
                field,
                "`set` requires `get`: write-only fields are not supported",
            ));
        }

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let script_field = field_attrs.name.unwrap_or_else(|| ident.to_string());
        let ty = &field.ty;

        let member = if field_attrs.set {
            quote! {
                .field(
                    #script_field,
                    |this: &Self| -> #ty { ::core::clone::Clone::clone(&this.#ident) },
                    |this: &mut Self, value: #ty| this.#ident = value,
                )
            }
        } else {
            quote! {
                .readonly(
                    #script_field,
                    |this: &Self| -> #ty { ::core::clone::Clone::clone(&this.#ident) },
                )
            }
        };
        members.push(member);
    }

    Ok(members)
}
