pub mod monday;
