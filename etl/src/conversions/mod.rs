mod attribute;
mod bind;
mod numeric;

pub use attribute::{AttributeValue, decode_attribute, decode_image};
pub use bind::BindError;
pub use numeric::encode_numeric;
