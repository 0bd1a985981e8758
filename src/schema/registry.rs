//! The declared shape of every request payload the API accepts.

use super::{DefaultValue, Field, FieldType, Schema};

pub const TITLE: FieldType = FieldType::String { min: 1, max: 200 };
pub const DESCRIPTION: FieldType = FieldType::String { min: 0, max: 2000 };
pub const PASSWORD: FieldType = FieldType::Secret { min: 8, max: 128 };
pub const MAX_BATCH: usize = 50;
pub const MAX_PAGE: i64 = 100;

pub static SIGN_UP: Schema = Schema::new(
    "sign_up",
    &[
        Field::required("email", FieldType::Email),
        Field::required("password", PASSWORD),
        Field::required("name", FieldType::String { min: 1, max: 100 }),
    ],
);

// Length is not checked on sign-in so a policy change never locks out
// an existing account.
pub static SIGN_IN: Schema = Schema::new(
    "sign_in",
    &[
        Field::required("email", FieldType::Email),
        Field::required("password", FieldType::Secret { min: 1, max: 1024 }),
    ],
);

pub static VERIFY_EMAIL: Schema = Schema::new(
    "verify_email",
    &[
        Field::required("email", FieldType::Email),
        Field::required("token", FieldType::Secret { min: 1, max: 256 }),
    ],
);

pub static CREATE_TODO: Schema = Schema::new(
    "create_todo",
    &[
        Field::required("title", TITLE),
        Field::optional("description", DESCRIPTION),
        Field::optional("completed", FieldType::Boolean).with_default(DefaultValue::Bool(false)),
    ],
);

pub static CREATE_TODOS: Schema = Schema::new(
    "create_todos",
    &[Field::required(
        "items",
        FieldType::List {
            item: &CREATE_TODO,
            min: 1,
            max: MAX_BATCH,
        },
    )],
);

pub static UPDATE_TODO: Schema = Schema::new(
    "update_todo",
    &[
        Field::optional("title", TITLE),
        Field::optional("description", DESCRIPTION).nullable(),
        Field::optional("completed", FieldType::Boolean),
    ],
)
.require_any();

pub static SEND_VERIFICATION: Schema = Schema::new(
    "send_verification",
    &[Field::required("email", FieldType::Email)],
);

pub static LIST_TODOS: Schema = Schema::new(
    "list_todos",
    &[
        Field::optional("limit", FieldType::Integer { min: 1, max: MAX_PAGE })
            .with_default(DefaultValue::Int(20)),
        Field::optional("offset", FieldType::Integer { min: 0, max: i64::MAX })
            .with_default(DefaultValue::Int(0)),
        Field::optional("completed", FieldType::Boolean),
    ],
);

pub static TODO_ID: Schema = Schema::new("todo_id", &[Field::required("id", FieldType::Uuid)]);

pub static AI_PROMPT: Schema = Schema::new(
    "ai_prompt",
    &[Field::required("prompt", FieldType::String { min: 1, max: 4000 })],
);
