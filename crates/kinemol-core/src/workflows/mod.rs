pub mod dynamics;
pub mod vibrations;
