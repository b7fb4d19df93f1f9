//! CPE identifier model.
//!
//! Three textual forms are understood:
//! - formatted string: `cpe:2.3:a:vendor:product:version:update:edition:language:sw_edition:target_sw:target_hw:other`
//! - legacy URI: `cpe:/a:vendor:product:version:update:edition:language`, where edition may
//!   pack `~edition~sw_edition~target_sw~target_hw~other`
//! - product key: `vendor:product`, the form kept in the overlay and candidate lists.
//!
//! Only application (`a`) names are accepted; everything else is a `ParseError`.

mod escape;
mod identifier;

pub use escape::{escape, split_escaped, unescape};
pub use identifier::{
    Attribute, AttributeValue, Binding, Identifier, ParseError, ProductKey, SuccessorError,
    FS_VERSION,
};
