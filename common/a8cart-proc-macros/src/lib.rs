mod enums;

use proc_macro::TokenStream;

/// Implement `std::fmt::Display` and a `to_str(&self) -> &'static str` method for a fieldless enum.
///
/// Each variant displays as its identifier.
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    enums::enum_display(input)
}

/// Implement `std::str::FromStr` for a fieldless enum. Parsing is case-insensitive and matches
/// against variant identifiers.
#[proc_macro_derive(EnumFromStr)]
pub fn enum_from_str(input: TokenStream) -> TokenStream {
    enums::enum_from_str(input)
}

/// Add an `ALL` associated constant containing every variant of a fieldless enum, in declaration
/// order.
#[proc_macro_derive(EnumAll)]
pub fn enum_all(input: TokenStream) -> TokenStream {
    enums::enum_all(input)
}

/// Implement `clap::ValueEnum` in terms of `ALL` and `to_str()`.
///
/// Requires `EnumDisplay` and `EnumAll` on the same type.
#[proc_macro_derive(CustomValueEnum)]
pub fn custom_value_enum(input: TokenStream) -> TokenStream {
    enums::custom_value_enum(input)
}

/// Generate a `match_each_variant!` macro for an enum where every variant wraps exactly one value.
///
/// `match_each_variant!(value, inner => expr)` evaluates `expr` against whichever variant is
/// present. `match_each_variant!(value, inner => :variant(expr))` additionally re-wraps the result
/// in the same variant.
#[proc_macro_derive(MatchEachVariantMacro)]
pub fn match_each_variant_macro(input: TokenStream) -> TokenStream {
    enums::match_each_variant_macro(input)
}
