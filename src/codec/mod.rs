//! Voxel stream codecs.

mod pbd8;

pub use pbd8::{
    decode_pbd8, encode_pbd8, Pbd8Decoder, MAX_DIFFERENCE_RUN, MAX_LITERAL_RUN, MAX_REPEAT_RUN,
};
