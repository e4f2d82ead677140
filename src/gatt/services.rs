//! Discovered service tree with resolved names.

use smol_str::SmolStr;
use uuid::Uuid;

use crate::{
   bluetooth::transport::{CharFlags, ServiceInfo},
   gatt::names::UuidNames,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
   pub uuid: Uuid,
   pub name: SmolStr,
   pub flags: CharFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
   pub uuid: Uuid,
   pub name: SmolStr,
   pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
   pub fn readable(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
      self.characteristics.iter().filter(|c| c.flags.readable())
   }

   pub fn subscribable(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
      self.characteristics.iter().filter(|c| c.flags.subscribable())
   }
}

/// Services of one connection, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMap(Vec<ServiceDescriptor>);

impl ServiceMap {
   pub fn resolve(services: Vec<ServiceInfo>, names: &UuidNames) -> Self {
      Self(
         services
            .into_iter()
            .map(|service| ServiceDescriptor {
               uuid: service.uuid,
               name: names.display(&service.uuid),
               characteristics: service
                  .characteristics
                  .into_iter()
                  .map(|c| CharacteristicDescriptor {
                     uuid: c.uuid,
                     name: names.display(&c.uuid),
                     flags: c.flags,
                  })
                  .collect(),
            })
            .collect(),
      )
   }

   pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
      self.0.iter()
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn contains_service(&self, uuid: &Uuid) -> bool {
      self.0.iter().any(|s| s.uuid == *uuid)
   }

   pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
      self
         .0
         .iter()
         .flat_map(|s| s.characteristics.iter())
         .find(|c| c.uuid == *uuid)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{bluetooth::transport::CharacteristicInfo, gatt::names::sig};

   #[test]
   fn test_resolve_names_and_lookup() {
      let info = vec![ServiceInfo {
         uuid: sig(0x180d),
         characteristics: vec![
            CharacteristicInfo {
               uuid: sig(0x2a37),
               flags: CharFlags {
                  notify: true,
                  ..Default::default()
               },
            },
            CharacteristicInfo {
               uuid: sig(0x2a39),
               flags: CharFlags {
                  read: true,
                  ..Default::default()
               },
            },
         ],
      }];
      let map = ServiceMap::resolve(info, &UuidNames::builtin());

      assert_eq!(map.len(), 1);
      assert!(map.contains_service(&sig(0x180d)));
      assert!(!map.contains_service(&sig(0x180f)));

      let service = map.iter().next().unwrap();
      assert_eq!(service.name, "Heart Rate");
      assert_eq!(service.readable().count(), 1);
      assert_eq!(service.subscribable().next().unwrap().name, "Heart Rate Measurement");
      assert_eq!(
         map.characteristic(&sig(0x2a39)).unwrap().name,
         "Heart Rate Control Point"
      );
   }
}
