mod extract;
mod light;
mod light_list;
mod maths;
mod reservoir;
mod restir;
mod sampling;
mod scene;
mod texture;

pub mod prelude {
    pub use crate::extract::*;
    pub use crate::light::*;
    pub use crate::light_list::*;
    pub use crate::maths::*;
    pub use crate::reservoir::*;
    pub use crate::restir::*;
    pub use crate::sampling::*;
    pub use crate::scene::*;
    pub use crate::texture::*;
}
