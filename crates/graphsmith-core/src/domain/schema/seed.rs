//! Built-in seed schema

use super::definition::{ClassDefinition, PropertyDefinition};
use super::system::PredefinedEntity;

/// Name of the predefined entity standing for the device owner
pub const USER_ENTITY: &str = "User";

pub(crate) fn seed_classes() -> Vec<ClassDefinition> {
    vec![
        ClassDefinition::new("Person")
            .with_description("A human being, including the device owner and their contacts")
            .with_property(
                PropertyDefinition::new("relation")
                    .with_description("How the person relates to the user"),
            )
            .with_property(
                PropertyDefinition::new("contact")
                    .with_description("Phone number, handle or address used to reach the person"),
            ),
        ClassDefinition::new("App")
            .with_description("A mobile application installed on the device")
            .with_property(
                PropertyDefinition::new("category")
                    .with_description("Kind of app, such as messaging, video or shopping"),
            )
            .with_property(
                PropertyDefinition::new("package_name")
                    .with_description("Platform package identifier"),
            ),
        ClassDefinition::new("Content")
            .with_description("A piece of content: a message, post, video, photo or document")
            .with_property(
                PropertyDefinition::new("content_type")
                    .with_description("Text, image, video, audio or document")
                    .required(),
            )
            .with_property(
                PropertyDefinition::new("topic").with_description("What the content is about"),
            ),
        ClassDefinition::new("Place")
            .with_description("A physical or virtual location")
            .with_property(
                PropertyDefinition::new("address").with_description("Street address or URL"),
            ),
    ]
}

pub(crate) fn seed_predefined_entities() -> Vec<PredefinedEntity> {
    vec![
        PredefinedEntity::new(USER_ENTITY, "The owner of the device whose behaviour is observed")
            .with_class("Person"),
    ]
}
