pub(crate) mod loader;
