// Utilities module
//
// - validation: host and port checks shared by the config and policy layers

pub mod validation;
