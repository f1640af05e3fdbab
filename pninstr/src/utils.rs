use strum::EnumIs;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Hash, EnumIs, Error)]
pub enum Error {
    /// An instruction refers to a function that is not part of the module.
    #[error(
        "An instruction of function `{function}` refers to a function referenced by `{undefined}` that is not defined within the module."
    )]
    UndefinedFunction { function: String, undefined: Uuid },

    /// Two functions of the same module share a name.
    #[error(
        "The function name `{name}` is used more than once within the module. Function names must be unique."
    )]
    DuplicateFunctionName { name: String },

    /// Functions must be named so that they can be recorded across compilation units.
    #[error("The function referenced by `{uuid}` has an empty name.")]
    EmptyFunctionName { uuid: Uuid },

    /// A definition must contain at least its entry block.
    #[error(
        "Function `{function}` is a definition without any basic block. Declarations must use an absent body instead."
    )]
    EmptyBody { function: String },

    /// The key of a function stored in the module does not match the function itself.
    #[error("Function `{function}` is stored under `{key}` but identifies itself as `{uuid}`.")]
    MismatchedFunctionKey {
        function: String,
        key: Uuid,
        uuid: Uuid,
    },
}
