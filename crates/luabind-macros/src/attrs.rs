//! Attribute parsing for `#[usertype(...)]`.

use syn::{Attribute, LitStr};

/// Parsed `#[usertype(...)]` attributes on a type.
#[derive(Debug, Default)]
pub struct TypeAttrs {
    /// Dotted script name (default: Rust struct name)
    pub name: Option<LitStr>,
    /// Memory class modifier
    pub class: Option<ClassAttr>,
    /// Decode by cloning out of the block
    pub clone: bool,
}

/// Memory class attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassAttr {
    Flat,
    Boxed,
}

/// Parsed `#[usertype(...)]` attributes on a field.
#[derive(Debug, Default)]
pub struct FieldAttrs {
    /// Expose a getter
    pub get: bool,
    /// Expose a setter
    pub set: bool,
    /// Override field name
    pub name: Option<String>,
}

impl TypeAttrs {
    /// Parse attributes from a list of `#[usertype(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("usertype") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    result.name = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("flat") {
                    result.set_class(ClassAttr::Flat, &meta)?;
                } else if meta.path.is_ident("boxed") {
                    result.set_class(ClassAttr::Boxed, &meta)?;
                } else if meta.path.is_ident("clone") {
                    result.clone = true;
                } else {
                    return Err(meta.error(format!(
                        "unknown usertype attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }

    fn set_class(&mut self, class: ClassAttr, meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
        match self.class {
            Some(existing) if existing != class => {
                Err(meta.error("a usertype is either `flat` or `boxed`, not both"))
            }
            _ => {
                self.class = Some(class);
                Ok(())
            }
        }
    }
}

impl FieldAttrs {
    /// Parse attributes from a list of `#[usertype(...)]` attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("usertype") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("get") {
                    result.get = true;
                } else if meta.path.is_ident("set") {
                    result.set = true;
                } else if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    result.name = Some(value.value());
                } else {
                    return Err(meta.error(format!(
                        "unknown usertype field attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}
