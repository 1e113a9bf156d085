mod helpers;
mod index;
